//! Retrieval errors.

use thiserror::Error;
use whistledrop_core::{KeyId, SubmissionId};
use whistledrop_crypto::CryptoError;

/// Errors from [`retrieve`](crate::retrieve) and [`open`](crate::open).
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// No submission with this id
    #[error("submission {0} not found")]
    NotFound(SubmissionId),

    /// The keystore has no private key for the submission's key
    #[error("no private key for key {0} in the keystore")]
    NoMatchingKey(KeyId),

    /// Unwrapping or decryption failed. Never retried.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The submission source failed
    #[error("submission source failed: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RetrievalError {
    /// True for wrong-key and tampering failures.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::Crypto(err) if err.is_integrity_failure())
    }
}
