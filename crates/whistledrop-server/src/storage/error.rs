//! Storage error types.
//!
//! - `KeyNotFound` / `SubmissionNotFound`: unknown identifier
//! - `DuplicateKey`: public key already in the pool
//! - `KeyNotAllocated` / `KeyInUse`: key state does not permit the operation
//! - `Serialization`: a stored row failed to encode or decode
//! - `Io`: the underlying storage system failed

use thiserror::Error;
use whistledrop_core::{KeyId, SubmissionId};

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No key record with this id
    #[error("key {0} not found")]
    KeyNotFound(KeyId),

    /// No submission with this id
    #[error("submission {0} not found")]
    SubmissionNotFound(SubmissionId),

    /// The public key is already stored
    #[error("public key already stored as key {existing}")]
    DuplicateKey {
        /// Record holding the identical public key
        existing: KeyId,
    },

    /// A submission may only reference a key in the Allocated state
    #[error("key {0} is not allocated")]
    KeyNotAllocated(KeyId),

    /// The key is referenced by a live submission
    ///
    /// Returned when persisting a second submission against the same key,
    /// and when releasing or deleting a referenced key.
    #[error("key {key_id} is referenced by submission {submission_id}")]
    KeyInUse {
        /// Key that was targeted
        key_id: KeyId,
        /// Submission that references it
        submission_id: SubmissionId,
    },

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Returns true if the same call may succeed on retry.
    ///
    /// Only I/O faults are transient. Constraint violations and missing
    /// records will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}
