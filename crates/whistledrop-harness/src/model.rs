//! Reference model of the storage contract.
//!
//! Operations are generated by proptest (through `arbitrary`) and applied to
//! both [`ModelStorage`] and a real backend; their results and observable
//! states must agree step for step.
//!
//! ```text
//! Vec<Operation> ──┬──► ModelStorage::apply ──► Result<Outcome, StorageError>
//!                  │                                         │ equal
//!                  └──► Operation::apply(real) ──► Result<Outcome, StorageError>
//! ```
//!
//! The model encodes the contract every backend follows: ids are sequential
//! from 1 and never reused, allocation claims the lowest Available id, and
//! errors are checked in the order key existence, key reference, key state.

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use whistledrop_core::{KeyId, PoolStatus, SubmissionId};
use whistledrop_crypto::Envelope;
use whistledrop_server::{KeyState, NewSubmission, Storage, StorageError};

use crate::sim_env::SIM_EPOCH_SECS;

/// Distinct public keys the generator draws from. Small, so duplicates are
/// common.
const KEY_MATERIALS: u8 = 6;

/// Id range targeted by operations. Slightly larger than the number of keys
/// a short run creates, so unknown ids are exercised too.
const ID_SPACE: u8 = 10;

/// Operations on a storage backend.
#[derive(Debug, Clone, Copy, Arbitrary)]
pub enum Operation {
    /// Import a public key.
    InsertKey {
        /// Selects the key bytes; equal selectors are duplicates.
        material: u8,
    },

    /// Claim the next Available key.
    Allocate,

    /// Compensating release.
    Release {
        /// Target key id
        key: u8,
    },

    /// Store a submission for a key.
    Persist {
        /// Target key id
        key: u8,
    },

    /// Delete a submission and free its key.
    Purge {
        /// Target submission id
        submission: u8,
    },

    /// Delete a key record.
    Delete {
        /// Target key id
        key: u8,
    },

    /// Advance the clock.
    AdvanceTime {
        /// Seconds to add
        secs: u8,
    },
}

/// Successful result of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// New key record
    Inserted(KeyId),
    /// Claimed key, `None` when the pool is empty
    Allocated(Option<KeyId>),
    /// Whether the key changed state
    Released(bool),
    /// New submission
    Persisted(SubmissionId),
    /// Key freed by the purge
    Purged(KeyId),
    /// Key record removed
    Deleted,
    /// Clock moved
    TimeAdvanced,
}

fn key_id(raw: u8) -> KeyId {
    KeyId::new(u64::from(raw % ID_SPACE))
}

fn submission_id(raw: u8) -> SubmissionId {
    SubmissionId::new(u64::from(raw % ID_SPACE))
}

fn public_key(material: u8) -> Vec<u8> {
    let selector = material % KEY_MATERIALS;
    let mut bytes = b"model-public-key-".to_vec();
    bytes.push(selector);
    bytes
}

fn new_submission(key_id: KeyId, now: u64) -> NewSubmission {
    NewSubmission {
        filename: format!("model-{key_id}.txt"),
        envelope: Envelope { iv: vec![0x11; 16], ciphertext: vec![0x22; 48] },
        wrapped_key: vec![0x33; 128],
        key_id,
        created_at: now,
    }
}

impl Operation {
    /// Run the operation against a real backend at time `now`.
    pub fn apply<S: Storage>(self, storage: &S, now: u64) -> Result<Outcome, StorageError> {
        match self {
            Self::InsertKey { material } => {
                storage.insert_key(&public_key(material), now).map(Outcome::Inserted)
            },
            Self::Allocate => {
                storage.allocate_key(now).map(|claimed| Outcome::Allocated(claimed.map(|(id, _)| id)))
            },
            Self::Release { key } => storage.release_key(key_id(key)).map(Outcome::Released),
            Self::Persist { key } => {
                storage.insert_submission(&new_submission(key_id(key), now)).map(Outcome::Persisted)
            },
            Self::Purge { submission } => {
                storage.purge_submission(submission_id(submission)).map(Outcome::Purged)
            },
            Self::Delete { key } => storage.delete_key(key_id(key)).map(|()| Outcome::Deleted),
            Self::AdvanceTime { .. } => Ok(Outcome::TimeAdvanced),
        }
    }
}

#[derive(Debug, Clone)]
struct ModelKey {
    public_key: Vec<u8>,
    state: KeyState,
}

/// Reference implementation of [`Storage`] semantics, single-threaded and
/// obviously correct.
#[derive(Debug, Clone)]
pub struct ModelStorage {
    keys: BTreeMap<KeyId, ModelKey>,
    submissions: BTreeMap<SubmissionId, KeyId>,
    next_key_id: u64,
    next_submission_id: u64,
    now: u64,
}

impl Default for ModelStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelStorage {
    /// Empty store with the clock at the simulation epoch.
    pub fn new() -> Self {
        Self {
            keys: BTreeMap::new(),
            submissions: BTreeMap::new(),
            next_key_id: 1,
            next_submission_id: 1,
            now: SIM_EPOCH_SECS,
        }
    }

    /// Current model time. Pass to [`Operation::apply`] after applying the
    /// same operation to the model.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Apply `op` and return the result every backend must produce.
    pub fn apply(&mut self, op: Operation) -> Result<Outcome, StorageError> {
        match op {
            Operation::InsertKey { material } => {
                let bytes = public_key(material);
                if let Some((&existing, _)) = self.keys.iter().find(|(_, k)| k.public_key == bytes)
                {
                    return Err(StorageError::DuplicateKey { existing });
                }
                let id = KeyId::new(self.next_key_id);
                self.next_key_id += 1;
                self.keys.insert(id, ModelKey { public_key: bytes, state: KeyState::Available });
                Ok(Outcome::Inserted(id))
            },
            Operation::Allocate => {
                let now = self.now;
                let claimed = self.keys.iter_mut().find(|(_, k)| k.state.is_available()).map(
                    |(&id, key)| {
                        key.state = KeyState::Allocated { at_secs: now };
                        id
                    },
                );
                Ok(Outcome::Allocated(claimed))
            },
            Operation::Release { key } => {
                let id = key_id(key);
                self.ensure_exists(id)?;
                self.ensure_unreferenced(id)?;
                let Some(record) = self.keys.get_mut(&id) else {
                    return Err(StorageError::KeyNotFound(id));
                };
                let changed = !record.state.is_available();
                record.state = KeyState::Available;
                Ok(Outcome::Released(changed))
            },
            Operation::Persist { key } => {
                let id = key_id(key);
                self.ensure_exists(id)?;
                self.ensure_unreferenced(id)?;
                if self.keys.get(&id).is_some_and(|k| k.state.is_available()) {
                    return Err(StorageError::KeyNotAllocated(id));
                }
                let submission = SubmissionId::new(self.next_submission_id);
                self.next_submission_id += 1;
                self.submissions.insert(submission, id);
                Ok(Outcome::Persisted(submission))
            },
            Operation::Purge { submission } => {
                let id = submission_id(submission);
                let key = self.submissions.remove(&id).ok_or(StorageError::SubmissionNotFound(id))?;
                if let Some(record) = self.keys.get_mut(&key) {
                    record.state = KeyState::Available;
                }
                Ok(Outcome::Purged(key))
            },
            Operation::Delete { key } => {
                let id = key_id(key);
                self.ensure_exists(id)?;
                self.ensure_unreferenced(id)?;
                self.keys.remove(&id);
                Ok(Outcome::Deleted)
            },
            Operation::AdvanceTime { secs } => {
                self.now += u64::from(secs);
                Ok(Outcome::TimeAdvanced)
            },
        }
    }

    /// Counters the backend must report.
    pub fn status(&self) -> PoolStatus {
        let total_keys = self.keys.len() as u64;
        let available_keys = self.keys.values().filter(|k| k.state.is_available()).count() as u64;
        PoolStatus { total_keys, available_keys, used_keys: total_keys - available_keys }
    }

    /// Key states ordered by id.
    pub fn key_states(&self) -> Vec<(KeyId, KeyState)> {
        self.keys.iter().map(|(&id, key)| (id, key.state)).collect()
    }

    /// Submission → key references ordered by submission id.
    pub fn references(&self) -> Vec<(SubmissionId, KeyId)> {
        self.submissions.iter().map(|(&id, &key)| (id, key)).collect()
    }

    fn ensure_exists(&self, id: KeyId) -> Result<(), StorageError> {
        if self.keys.contains_key(&id) { Ok(()) } else { Err(StorageError::KeyNotFound(id)) }
    }

    fn ensure_unreferenced(&self, id: KeyId) -> Result<(), StorageError> {
        match self.submissions.iter().find(|&(_, &key)| key == id) {
            Some((&submission_id, _)) => Err(StorageError::KeyInUse { key_id: id, submission_id }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_takes_lowest_available_id() {
        let mut model = ModelStorage::new();
        for material in 0..3 {
            model.apply(Operation::InsertKey { material }).unwrap();
        }

        model.apply(Operation::Allocate).unwrap();
        model.apply(Operation::Allocate).unwrap();
        model.apply(Operation::Release { key: 1 }).unwrap();

        assert_eq!(model.apply(Operation::Allocate), Ok(Outcome::Allocated(Some(KeyId::new(1)))));
        assert_eq!(model.status().available_keys, 1);
    }

    #[test]
    fn referenced_key_cannot_be_released_or_deleted() {
        let mut model = ModelStorage::new();
        model.apply(Operation::InsertKey { material: 0 }).unwrap();
        model.apply(Operation::Allocate).unwrap();
        model.apply(Operation::Persist { key: 1 }).unwrap();

        let in_use =
            Err(StorageError::KeyInUse { key_id: KeyId::new(1), submission_id: SubmissionId::new(1) });
        assert_eq!(model.apply(Operation::Release { key: 1 }), in_use);
        assert_eq!(model.apply(Operation::Delete { key: 1 }), in_use);
        assert_eq!(model.apply(Operation::Purge { submission: 1 }), Ok(Outcome::Purged(KeyId::new(1))));
        assert_eq!(model.apply(Operation::Release { key: 1 }), Ok(Outcome::Released(false)));
    }

    #[test]
    fn duplicate_material_is_rejected() {
        let mut model = ModelStorage::new();
        model.apply(Operation::InsertKey { material: 2 }).unwrap();

        assert_eq!(
            model.apply(Operation::InsertKey { material: 2 + KEY_MATERIALS }),
            Err(StorageError::DuplicateKey { existing: KeyId::new(1) })
        );
    }
}
