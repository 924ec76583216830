//! Standard storage invariants.

use std::collections::{BTreeMap, HashMap};

use whistledrop_core::KeyId;
use whistledrop_server::{KeyRecord, KeyState};

use super::{Invariant, InvariantResult, StorageSnapshot, Violation};

/// No two submissions reference the same key.
///
/// A shared key would let one recipient key decrypt two uploads and break
/// the one-key-per-submission accounting.
pub struct UniqueKeyReferences;

impl Invariant for UniqueKeyReferences {
    fn name(&self) -> &'static str {
        "unique_key_references"
    }

    fn check(&self, state: &StorageSnapshot) -> InvariantResult {
        let mut seen = HashMap::new();
        for submission in &state.submissions {
            if let Some(first) = seen.insert(submission.key_id, submission.id) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "key {} referenced by submissions {first} and {}",
                        submission.key_id, submission.id
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Every submission references an existing, Allocated key.
pub struct ReferencedKeysAllocated;

impl Invariant for ReferencedKeysAllocated {
    fn name(&self) -> &'static str {
        "referenced_keys_allocated"
    }

    fn check(&self, state: &StorageSnapshot) -> InvariantResult {
        let keys: BTreeMap<KeyId, &KeyRecord> =
            state.keys.iter().map(|record| (record.id, record)).collect();

        for submission in &state.submissions {
            match keys.get(&submission.key_id) {
                None => {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "submission {} references missing key {}",
                            submission.id, submission.key_id
                        ),
                    });
                },
                Some(record) if record.state.is_available() => {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "submission {} references available key {}",
                            submission.id, submission.key_id
                        ),
                    });
                },
                Some(_) => {},
            }
        }
        Ok(())
    }
}

/// Reported counters match the key records.
pub struct StatusConsistency;

impl Invariant for StatusConsistency {
    fn name(&self) -> &'static str {
        "status_consistency"
    }

    fn check(&self, state: &StorageSnapshot) -> InvariantResult {
        let total = state.keys.len() as u64;
        let available = state.keys.iter().filter(|record| record.state.is_available()).count() as u64;
        let status = state.status;

        if status.total_keys != total
            || status.available_keys != available
            || status.used_keys != total - available
        {
            return Err(Violation {
                invariant: self.name(),
                message: format!(
                    "status {status:?} disagrees with {total} records ({available} available)"
                ),
            });
        }
        Ok(())
    }
}

/// No public key is stored twice.
pub struct UniquePublicKeys;

impl Invariant for UniquePublicKeys {
    fn name(&self) -> &'static str {
        "unique_public_keys"
    }

    fn check(&self, state: &StorageSnapshot) -> InvariantResult {
        let mut seen: HashMap<&[u8], KeyId> = HashMap::new();
        for record in &state.keys {
            if let Some(first) = seen.insert(record.public_key.as_slice(), record.id) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("keys {first} and {} hold the same public key", record.id),
                });
            }
        }
        Ok(())
    }
}

/// A key is never allocated before it was imported.
pub struct AllocatedAfterImport;

impl Invariant for AllocatedAfterImport {
    fn name(&self) -> &'static str {
        "allocated_after_import"
    }

    fn check(&self, state: &StorageSnapshot) -> InvariantResult {
        for record in &state.keys {
            if let KeyState::Allocated { at_secs } = record.state {
                if at_secs < record.created_at_secs {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "key {} allocated at {at_secs}, imported at {}",
                            record.id, record.created_at_secs
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}
