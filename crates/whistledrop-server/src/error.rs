//! Server error types.
//!
//! One enum per component. Storage faults are wrapped, never flattened to
//! strings, so callers can still ask whether a retry makes sense.

use std::path::PathBuf;

use thiserror::Error;
use whistledrop_core::{KeyId, SubmissionId};
use whistledrop_crypto::CryptoError;

use crate::storage::StorageError;

/// Errors from [`KeyPool`](crate::KeyPool) operations.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Every key is Allocated. The upload must be rejected.
    #[error("no recipient key available")]
    NoAvailableKey,

    /// The public key is already in the pool. Importers skip these.
    #[error("public key already imported as key {existing}")]
    DuplicateKey {
        /// Record holding the same public key
        existing: KeyId,
    },

    /// Unknown key id
    #[error("key {0} not found")]
    NotFound(KeyId),

    /// A live submission references the key; purge it first.
    #[error("key {key_id} is in use by submission {submission_id}")]
    KeyInUse {
        /// Key that was targeted
        key_id: KeyId,
        /// Submission referencing it
        submission_id: SubmissionId,
    },

    /// Key material could not be parsed or generated
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A key import file could not be read or understood
    #[error("key file {path}: {reason}")]
    ImportFile {
        /// File being imported
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Backing store failure
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl PoolError {
    /// Returns true if the same call may succeed on retry.
    ///
    /// `NoAvailableKey` is not retryable: the pool only refills by
    /// administrative action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<StorageError> for PoolError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateKey { existing } => Self::DuplicateKey { existing },
            StorageError::KeyNotFound(key_id) => Self::NotFound(key_id),
            StorageError::KeyInUse { key_id, submission_id } => {
                Self::KeyInUse { key_id, submission_id }
            },
            other => Self::Storage(other),
        }
    }
}

/// Errors from [`SubmissionStore`](crate::SubmissionStore) operations.
#[derive(Error, Debug)]
pub enum SubmissionError {
    /// Unknown submission id
    #[error("submission {0} not found")]
    NotFound(SubmissionId),

    /// The store refused or failed to write.
    ///
    /// Covers storage faults and constraint violations alike. After a failed
    /// persist the caller must release the allocated key.
    #[error("persistence failure: {0}")]
    PersistenceFailure(StorageError),
}

impl SubmissionError {
    /// Returns true if the same call may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PersistenceFailure(err) => err.is_retryable(),
            Self::NotFound(_) => false,
        }
    }
}

impl From<StorageError> for SubmissionError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SubmissionNotFound(id) => Self::NotFound(id),
            other => Self::PersistenceFailure(other),
        }
    }
}

/// Errors from [`Intake::submit`](crate::Intake::submit).
#[derive(Error, Debug)]
pub enum IntakeError {
    /// No usable filename after stripping directories
    #[error("upload has no filename")]
    MissingFilename,

    /// Extension outside the allow-list
    #[error("file type {extension:?} is not accepted")]
    ExtensionNotAllowed {
        /// Lowercased extension, empty if none
        extension: String,
    },

    /// Upload exceeds the size limit
    #[error("upload of {size} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Upload size
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Allocation failed (including pool exhaustion)
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Encrypting or wrapping failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Persisting the submission failed; the key was released
    #[error(transparent)]
    Persist(#[from] SubmissionError),
}

impl IntakeError {
    /// True when the upload was refused because the pool is empty.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, Self::Pool(PoolError::NoAvailableKey))
    }

    /// Returns true if resubmitting the same upload may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Pool(err) => err.is_retryable(),
            Self::Persist(err) => err.is_retryable(),
            _ => false,
        }
    }
}
