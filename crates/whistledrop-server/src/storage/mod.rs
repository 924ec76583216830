//! Storage abstraction for the key pool and submissions
//!
//! Trait-based abstraction over the records the server keeps: recipient key
//! records and submissions. The trait is synchronous; every method is one
//! atomic unit against the backing store.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::{ChaosScope, ChaoticStorage};
pub use error::StorageError;
pub use memory::MemoryStorage;
use serde::{Deserialize, Serialize};
use whistledrop_core::{KeyId, PoolStatus, Submission, SubmissionId, SubmissionMetadata};
use whistledrop_crypto::Envelope;

pub use self::redb::RedbStorage;

/// Allocation state of a key record.
///
/// The allocation timestamp exists iff the key is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyState {
    /// Can be handed to the next upload
    Available,
    /// Handed to exactly one upload
    Allocated {
        /// Unix seconds at allocation
        at_secs: u64,
    },
}

impl KeyState {
    /// True for [`KeyState::Available`].
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// A recipient public key and its allocation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Stable identifier
    pub id: KeyId,
    /// SubjectPublicKeyInfo DER
    pub public_key: Vec<u8>,
    /// Allocation state
    pub state: KeyState,
    /// Unix seconds at import
    pub created_at_secs: u64,
}

/// A submission about to be persisted. Storage assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubmission {
    /// Original filename
    pub filename: String,
    /// Encrypted file contents
    pub envelope: Envelope,
    /// Symmetric key wrapped for `key_id`
    pub wrapped_key: Vec<u8>,
    /// Allocated key used for wrapping
    pub key_id: KeyId,
    /// Unix seconds
    pub created_at: u64,
}

impl NewSubmission {
    /// The stored form once `id` is assigned.
    pub fn into_submission(self, id: SubmissionId) -> Submission {
        Submission {
            id,
            filename: self.filename,
            envelope: self.envelope,
            wrapped_key: self.wrapped_key,
            key_id: self.key_id,
            created_at: self.created_at,
        }
    }
}

/// Storage abstraction for key records and submissions
///
/// Must be Clone (shared by the pool, the submission store and intake),
/// Send + Sync (uploads run on many threads), and synchronous. Clones access
/// the same underlying storage.
///
/// # Invariants
///
/// Every implementation maintains, after each successful call:
///
/// - No two key records hold the same public key
/// - A key moves Available → Allocated only inside `allocate_key`, and
///   each successful `allocate_key` returns a key no other call received
///   since its last release
/// - Every submission references exactly one key; no two submissions
///   reference the same key; a referenced key is Allocated
///
/// # Panics
///
/// Implementations may panic if internal synchronization primitives are
/// poisoned (a thread panicked while holding a lock).
pub trait Storage: Clone + Send + Sync + 'static {
    /// Insert a new Available key record.
    ///
    /// # Errors
    ///
    /// `DuplicateKey` if an identical public key is already stored.
    fn insert_key(&self, public_key: &[u8], created_at_secs: u64) -> Result<KeyId, StorageError>;

    /// Atomically claim one Available key.
    ///
    /// Returns `None` if no key is Available. The check and the state change
    /// are one operation: concurrent callers never receive the same key.
    fn allocate_key(&self, at_secs: u64) -> Result<Option<(KeyId, Vec<u8>)>, StorageError>;

    /// Return an Allocated key to Available.
    ///
    /// Returns `false` if the key was already Available (no-op).
    ///
    /// # Errors
    ///
    /// `KeyNotFound` for unknown ids, `KeyInUse` if a submission references
    /// the key.
    fn release_key(&self, key_id: KeyId) -> Result<bool, StorageError>;

    /// Load one key record.
    fn load_key(&self, key_id: KeyId) -> Result<Option<KeyRecord>, StorageError>;

    /// All key records ordered by id.
    fn list_keys(&self) -> Result<Vec<KeyRecord>, StorageError>;

    /// Remove a key record.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` for unknown ids, `KeyInUse` if a submission references
    /// the key.
    fn delete_key(&self, key_id: KeyId) -> Result<(), StorageError>;

    /// Key counters.
    fn pool_status(&self) -> Result<PoolStatus, StorageError>;

    /// Persist a submission against its allocated key.
    ///
    /// # Errors
    ///
    /// `KeyNotFound`, `KeyNotAllocated`, or `KeyInUse` if the key does not
    /// satisfy the reference constraints. Nothing is stored on error.
    fn insert_submission(&self, submission: &NewSubmission) -> Result<SubmissionId, StorageError>;

    /// Load one submission.
    fn load_submission(&self, id: SubmissionId) -> Result<Option<Submission>, StorageError>;

    /// Metadata of all submissions ordered by id.
    fn list_submissions(&self) -> Result<Vec<SubmissionMetadata>, StorageError>;

    /// Delete a submission and return its key to Available, atomically.
    ///
    /// Returns the key that was freed.
    ///
    /// # Errors
    ///
    /// `SubmissionNotFound` for unknown ids.
    fn purge_submission(&self, id: SubmissionId) -> Result<KeyId, StorageError>;

    /// Submission referencing `key_id`, if any.
    fn key_reference(&self, key_id: KeyId) -> Result<Option<SubmissionId>, StorageError>;
}
