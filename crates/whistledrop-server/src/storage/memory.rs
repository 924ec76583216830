#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use whistledrop_core::{KeyId, PoolStatus, Submission, SubmissionId, SubmissionMetadata};

use super::{KeyRecord, KeyState, NewSubmission, Storage, StorageError};

/// In-memory storage implementation for testing and simulation
///
/// Each key record sits in its own slot with its own lock. Available ids are
/// indexed separately, so allocation pops the lowest id off the index and
/// runs the check-and-set on that one slot instead of scanning the table.
/// The key table lock is taken for writing only to add or remove records.
///
/// Lock order is key table, then submission table, then available index,
/// then slot. Every state change holds the index lock, so an id is in the
/// index exactly when its slot is Available.
///
/// # Panics
///
/// Every method panics if an internal lock is poisoned (a thread panicked
/// while holding it). Acceptable for test/simulation code.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<MemoryStorageInner>,
}

struct MemoryStorageInner {
    keys: RwLock<KeyTable>,
    submissions: Mutex<SubmissionTable>,
    available: Mutex<BTreeSet<KeyId>>,
}

struct KeyTable {
    slots: BTreeMap<KeyId, Arc<KeySlot>>,
    /// Uniqueness index over public key DER
    by_public_key: HashMap<Vec<u8>, KeyId>,
    next_id: u64,
}

struct KeySlot {
    id: KeyId,
    public_key: Vec<u8>,
    created_at_secs: u64,
    state: Mutex<KeyState>,
}

struct SubmissionTable {
    rows: BTreeMap<SubmissionId, Submission>,
    /// Key → submission uniqueness index
    by_key: HashMap<KeyId, SubmissionId>,
    next_id: u64,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryStorageInner {
                keys: RwLock::new(KeyTable {
                    slots: BTreeMap::new(),
                    by_public_key: HashMap::new(),
                    next_id: 1,
                }),
                submissions: Mutex::new(SubmissionTable {
                    rows: BTreeMap::new(),
                    by_key: HashMap::new(),
                    next_id: 1,
                }),
                available: Mutex::new(BTreeSet::new()),
            }),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorageInner {
    #[allow(clippy::expect_used)]
    fn keys(&self) -> RwLockReadGuard<'_, KeyTable> {
        self.keys.read().expect("key table lock poisoned")
    }

    #[allow(clippy::expect_used)]
    fn keys_mut(&self) -> RwLockWriteGuard<'_, KeyTable> {
        self.keys.write().expect("key table lock poisoned")
    }

    #[allow(clippy::expect_used)]
    fn submissions(&self) -> MutexGuard<'_, SubmissionTable> {
        self.submissions.lock().expect("submission table mutex poisoned")
    }

    #[allow(clippy::expect_used)]
    fn available(&self) -> MutexGuard<'_, BTreeSet<KeyId>> {
        self.available.lock().expect("available index mutex poisoned")
    }
}

impl KeySlot {
    #[allow(clippy::expect_used)]
    fn state(&self) -> MutexGuard<'_, KeyState> {
        self.state.lock().expect("key slot mutex poisoned")
    }

    fn record(&self) -> KeyRecord {
        KeyRecord {
            id: self.id,
            public_key: self.public_key.clone(),
            state: *self.state(),
            created_at_secs: self.created_at_secs,
        }
    }
}

impl KeyTable {
    fn slot(&self, key_id: KeyId) -> Result<&Arc<KeySlot>, StorageError> {
        self.slots.get(&key_id).ok_or(StorageError::KeyNotFound(key_id))
    }
}

impl SubmissionTable {
    fn ensure_unreferenced(&self, key_id: KeyId) -> Result<(), StorageError> {
        match self.by_key.get(&key_id) {
            Some(&submission_id) => Err(StorageError::KeyInUse { key_id, submission_id }),
            None => Ok(()),
        }
    }
}

impl Storage for MemoryStorage {
    fn insert_key(&self, public_key: &[u8], created_at_secs: u64) -> Result<KeyId, StorageError> {
        let mut keys = self.inner.keys_mut();

        if let Some(&existing) = keys.by_public_key.get(public_key) {
            return Err(StorageError::DuplicateKey { existing });
        }

        let id = KeyId::new(keys.next_id);
        keys.next_id += 1;

        keys.by_public_key.insert(public_key.to_vec(), id);
        keys.slots.insert(
            id,
            Arc::new(KeySlot {
                id,
                public_key: public_key.to_vec(),
                created_at_secs,
                state: Mutex::new(KeyState::Available),
            }),
        );

        self.inner.available().insert(id);

        debug_assert_eq!(keys.slots.len(), keys.by_public_key.len());
        Ok(id)
    }

    fn allocate_key(&self, at_secs: u64) -> Result<Option<(KeyId, Vec<u8>)>, StorageError> {
        let keys = self.inner.keys();
        let mut available = self.inner.available();

        while let Some(id) = available.pop_first() {
            let Some(slot) = keys.slots.get(&id) else { continue };

            let mut state = slot.state();
            debug_assert!(state.is_available(), "indexed key {id} is not available");
            if state.is_available() {
                *state = KeyState::Allocated { at_secs };
                return Ok(Some((slot.id, slot.public_key.clone())));
            }
        }

        Ok(None)
    }

    fn release_key(&self, key_id: KeyId) -> Result<bool, StorageError> {
        let keys = self.inner.keys();
        let slot = keys.slot(key_id)?;

        let submissions = self.inner.submissions();
        submissions.ensure_unreferenced(key_id)?;

        let mut available = self.inner.available();
        let mut state = slot.state();
        if state.is_available() {
            return Ok(false);
        }
        *state = KeyState::Available;
        available.insert(key_id);
        Ok(true)
    }

    fn load_key(&self, key_id: KeyId) -> Result<Option<KeyRecord>, StorageError> {
        Ok(self.inner.keys().slots.get(&key_id).map(|slot| slot.record()))
    }

    fn list_keys(&self) -> Result<Vec<KeyRecord>, StorageError> {
        Ok(self.inner.keys().slots.values().map(|slot| slot.record()).collect())
    }

    fn delete_key(&self, key_id: KeyId) -> Result<(), StorageError> {
        let mut keys = self.inner.keys_mut();
        keys.slot(key_id)?;

        self.inner.submissions().ensure_unreferenced(key_id)?;

        if let Some(slot) = keys.slots.remove(&key_id) {
            keys.by_public_key.remove(&slot.public_key);
        }
        self.inner.available().remove(&key_id);
        Ok(())
    }

    fn pool_status(&self) -> Result<PoolStatus, StorageError> {
        let keys = self.inner.keys();

        let total_keys = keys.slots.len() as u64;
        let available_keys = self.inner.available().len() as u64;

        Ok(PoolStatus { total_keys, available_keys, used_keys: total_keys - available_keys })
    }

    fn insert_submission(&self, submission: &NewSubmission) -> Result<SubmissionId, StorageError> {
        let keys = self.inner.keys();
        let slot = keys.slot(submission.key_id)?;

        let mut submissions = self.inner.submissions();
        submissions.ensure_unreferenced(submission.key_id)?;

        let state = slot.state();
        if state.is_available() {
            return Err(StorageError::KeyNotAllocated(submission.key_id));
        }

        let id = SubmissionId::new(submissions.next_id);
        submissions.next_id += 1;

        submissions.by_key.insert(submission.key_id, id);
        submissions.rows.insert(id, submission.clone().into_submission(id));

        Ok(id)
    }

    fn load_submission(&self, id: SubmissionId) -> Result<Option<Submission>, StorageError> {
        Ok(self.inner.submissions().rows.get(&id).cloned())
    }

    fn list_submissions(&self) -> Result<Vec<SubmissionMetadata>, StorageError> {
        Ok(self.inner.submissions().rows.values().map(Submission::metadata).collect())
    }

    fn purge_submission(&self, id: SubmissionId) -> Result<KeyId, StorageError> {
        let keys = self.inner.keys();
        let mut submissions = self.inner.submissions();

        let submission =
            submissions.rows.remove(&id).ok_or(StorageError::SubmissionNotFound(id))?;
        submissions.by_key.remove(&submission.key_id);

        if let Some(slot) = keys.slots.get(&submission.key_id) {
            let mut available = self.inner.available();
            *slot.state() = KeyState::Available;
            available.insert(submission.key_id);
        }

        Ok(submission.key_id)
    }

    fn key_reference(&self, key_id: KeyId) -> Result<Option<SubmissionId>, StorageError> {
        Ok(self.inner.submissions().by_key.get(&key_id).copied())
    }
}
