//! Observable storage state for invariant checking.
//!
//! Invariants run against a snapshot rather than live storage so that every
//! check in a registry sees the same state. Take snapshots while no other
//! thread is writing: the three reads are separate storage calls.

use whistledrop_core::{PoolStatus, SubmissionMetadata};
use whistledrop_server::{KeyRecord, Storage, StorageError};

/// Keys, submissions and counters of one storage backend.
#[derive(Debug, Clone, Default)]
pub struct StorageSnapshot {
    /// Key records ordered by id.
    pub keys: Vec<KeyRecord>,
    /// Submission listing ordered by id.
    pub submissions: Vec<SubmissionMetadata>,
    /// Counters as reported by the backend.
    pub status: PoolStatus,
}

impl StorageSnapshot {
    /// Empty store.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read the current state of `storage`.
    pub fn capture<S: Storage>(storage: &S) -> Result<Self, StorageError> {
        Ok(Self {
            keys: storage.list_keys()?,
            submissions: storage.list_submissions()?,
            status: storage.pool_status()?,
        })
    }
}
