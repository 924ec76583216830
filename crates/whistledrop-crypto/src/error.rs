//! Errors for envelope and key-wrapping operations.

use thiserror::Error;

/// Errors from the hybrid encryption primitives.
///
/// The integrity variants are deliberately coarse: a caller learns that
/// decryption failed, never which check rejected the input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Envelope failed authentication, alignment or padding checks.
    ///
    /// Signals tampering or the wrong symmetric key. Fatal for the
    /// retrieval attempt and never retried.
    #[error("envelope integrity check failed")]
    PaddingInvalid,

    /// Wrapped key could not be recovered with the given private key.
    ///
    /// Either the private key does not belong to the public key used for
    /// wrapping, or the wrapped bytes were altered.
    #[error("failed to unwrap symmetric key")]
    UnwrapFailed,

    /// Envelope is structurally unusable (e.g. wrong IV length).
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope {
        /// What was wrong with the envelope
        reason: String,
    },

    /// Wrapping the symmetric key failed (e.g. modulus too small).
    #[error("failed to wrap symmetric key: {reason}")]
    WrapFailed {
        /// Underlying failure
        reason: String,
    },

    /// Key material could not be parsed or encoded.
    #[error("invalid key material: {reason}")]
    InvalidKey {
        /// Underlying parse failure
        reason: String,
    },

    /// Key pair generation failed or was asked for an unsupported size.
    #[error("key generation failed: {reason}")]
    KeyGeneration {
        /// Underlying failure
        reason: String,
    },
}

impl CryptoError {
    /// True for failures that indicate tampering or a key mismatch.
    ///
    /// These are terminal for the operation that hit them.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::PaddingInvalid | Self::UnwrapFailed)
    }
}
