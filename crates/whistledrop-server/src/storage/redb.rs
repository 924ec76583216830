//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. Every
//! trait method runs in exactly one transaction, so pool state and
//! submissions survive restarts together or not at all.

use std::{fmt::Display, path::Path, sync::Arc};

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use serde::{Serialize, de::DeserializeOwned};
use whistledrop_core::{KeyId, PoolStatus, Submission, SubmissionId, SubmissionMetadata};

use super::{KeyRecord, KeyState, NewSubmission, Storage, StorageError};

/// Table: keys
/// Key: key id
/// Value: CBOR-encoded KeyRecord
const KEYS: TableDefinition<u64, &[u8]> = TableDefinition::new("keys");

/// Table: public_keys (uniqueness index)
/// Key: SPKI DER
/// Value: key id
const PUBLIC_KEYS: TableDefinition<&[u8], u64> = TableDefinition::new("public_keys");

/// Table: available_keys (allocation index)
/// Key: id of every key in the Available state
const AVAILABLE_KEYS: TableDefinition<u64, ()> = TableDefinition::new("available_keys");

/// Table: submissions
/// Key: submission id
/// Value: CBOR-encoded Submission
const SUBMISSIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("submissions");

/// Table: key_references (one submission per key)
/// Key: key id
/// Value: submission id
const KEY_REFERENCES: TableDefinition<u64, u64> = TableDefinition::new("key_references");

/// Table: counters
/// Key: counter name
/// Value: next id to assign
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const NEXT_KEY_ID: &str = "next_key_id";
const NEXT_SUBMISSION_ID: &str = "next_submission_id";

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
///
/// Redb serializes write transactions. Allocation pops the lowest id from
/// the `available_keys` index and flips that one record inside a single
/// write transaction, so no committed history ever shows a key claimed
/// twice.
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates all tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;
        Self::with_tables(db)
    }

    /// Open a database that must already exist. For tools that only read:
    /// a mistyped path is an error rather than a new empty database.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the file is missing or not a database.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = Database::open(path).map_err(|err| io(format!("{}: {err}", path.display())))?;
        Self::with_tables(db)
    }

    fn with_tables(db: Database) -> Result<Self, StorageError> {
        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(KEYS).map_err(io)?;
            let _ = txn.open_table(PUBLIC_KEYS).map_err(io)?;
            let _ = txn.open_table(AVAILABLE_KEYS).map_err(io)?;
            let _ = txn.open_table(SUBMISSIONS).map_err(io)?;
            let _ = txn.open_table(KEY_REFERENCES).map_err(io)?;
            let _ = txn.open_table(COUNTERS).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Storage for RedbStorage {
    fn insert_key(&self, public_key: &[u8], created_at_secs: u64) -> Result<KeyId, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let id = {
            let mut public_keys = txn.open_table(PUBLIC_KEYS).map_err(io)?;
            if let Some(existing) = public_keys.get(public_key).map_err(io)? {
                return Err(StorageError::DuplicateKey { existing: KeyId::new(existing.value()) });
            }

            let id = KeyId::new(next_id(&txn, NEXT_KEY_ID)?);
            let record = KeyRecord {
                id,
                public_key: public_key.to_vec(),
                state: KeyState::Available,
                created_at_secs,
            };

            write_row(&txn, KEYS, id.get(), &record)?;
            public_keys.insert(public_key, id.get()).map_err(io)?;
            txn.open_table(AVAILABLE_KEYS).map_err(io)?.insert(id.get(), ()).map_err(io)?;
            id
        };

        txn.commit().map_err(io)?;
        Ok(id)
    }

    fn allocate_key(&self, at_secs: u64) -> Result<Option<(KeyId, Vec<u8>)>, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let claimed = {
            let mut available = txn.open_table(AVAILABLE_KEYS).map_err(io)?;
            let Some(raw_id) = available.pop_first().map_err(io)?.map(|(key, _)| key.value())
            else {
                return Ok(None);
            };

            let id = KeyId::new(raw_id);
            let mut record: KeyRecord = read_row(&txn, KEYS, raw_id)?.ok_or_else(|| {
                StorageError::Serialization(format!("available index names missing key {id}"))
            })?;
            debug_assert!(record.state.is_available());

            record.state = KeyState::Allocated { at_secs };
            write_row(&txn, KEYS, raw_id, &record)?;
            (id, record.public_key)
        };

        txn.commit().map_err(io)?;
        Ok(Some(claimed))
    }

    fn release_key(&self, key_id: KeyId) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let mut record: KeyRecord =
            read_row(&txn, KEYS, key_id.get())?.ok_or(StorageError::KeyNotFound(key_id))?;
        ensure_unreferenced(&txn, key_id)?;

        if record.state.is_available() {
            return Ok(false);
        }

        record.state = KeyState::Available;
        write_row(&txn, KEYS, key_id.get(), &record)?;
        txn.open_table(AVAILABLE_KEYS).map_err(io)?.insert(key_id.get(), ()).map_err(io)?;

        txn.commit().map_err(io)?;
        Ok(true)
    }

    fn load_key(&self, key_id: KeyId) -> Result<Option<KeyRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(KEYS).map_err(io)?;

        match table.get(key_id.get()).map_err(io)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn list_keys(&self) -> Result<Vec<KeyRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(KEYS).map_err(io)?;

        let mut records = Vec::new();
        for result in table.iter().map_err(io)? {
            let (_, value) = result.map_err(io)?;
            records.push(decode(value.value())?);
        }

        Ok(records)
    }

    fn delete_key(&self, key_id: KeyId) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let record: KeyRecord =
            read_row(&txn, KEYS, key_id.get())?.ok_or(StorageError::KeyNotFound(key_id))?;
        ensure_unreferenced(&txn, key_id)?;

        txn.open_table(KEYS).map_err(io)?.remove(key_id.get()).map_err(io)?;
        txn.open_table(PUBLIC_KEYS).map_err(io)?.remove(record.public_key.as_slice()).map_err(io)?;
        txn.open_table(AVAILABLE_KEYS).map_err(io)?.remove(key_id.get()).map_err(io)?;

        txn.commit().map_err(io)?;
        Ok(())
    }

    fn pool_status(&self) -> Result<PoolStatus, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;

        let total_keys = txn.open_table(KEYS).map_err(io)?.len().map_err(io)?;
        let available_keys = txn.open_table(AVAILABLE_KEYS).map_err(io)?.len().map_err(io)?;
        debug_assert!(available_keys <= total_keys);

        Ok(PoolStatus { total_keys, available_keys, used_keys: total_keys - available_keys })
    }

    fn insert_submission(&self, submission: &NewSubmission) -> Result<SubmissionId, StorageError> {
        let key_id = submission.key_id;
        let txn = self.db.begin_write().map_err(io)?;

        let record: KeyRecord =
            read_row(&txn, KEYS, key_id.get())?.ok_or(StorageError::KeyNotFound(key_id))?;
        ensure_unreferenced(&txn, key_id)?;
        if record.state.is_available() {
            return Err(StorageError::KeyNotAllocated(key_id));
        }

        let id = SubmissionId::new(next_id(&txn, NEXT_SUBMISSION_ID)?);
        write_row(&txn, SUBMISSIONS, id.get(), &submission.clone().into_submission(id))?;
        txn.open_table(KEY_REFERENCES).map_err(io)?.insert(key_id.get(), id.get()).map_err(io)?;

        txn.commit().map_err(io)?;
        Ok(id)
    }

    fn load_submission(&self, id: SubmissionId) -> Result<Option<Submission>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(SUBMISSIONS).map_err(io)?;

        match table.get(id.get()).map_err(io)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn list_submissions(&self) -> Result<Vec<SubmissionMetadata>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(SUBMISSIONS).map_err(io)?;

        let mut listing = Vec::new();
        for result in table.iter().map_err(io)? {
            let (_, value) = result.map_err(io)?;
            let submission: Submission = decode(value.value())?;
            listing.push(submission.metadata());
        }

        Ok(listing)
    }

    fn purge_submission(&self, id: SubmissionId) -> Result<KeyId, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let submission: Submission =
            read_row(&txn, SUBMISSIONS, id.get())?.ok_or(StorageError::SubmissionNotFound(id))?;
        let key_id = submission.key_id;

        txn.open_table(SUBMISSIONS).map_err(io)?.remove(id.get()).map_err(io)?;
        txn.open_table(KEY_REFERENCES).map_err(io)?.remove(key_id.get()).map_err(io)?;

        if let Some(mut record) = read_row::<KeyRecord>(&txn, KEYS, key_id.get())? {
            record.state = KeyState::Available;
            write_row(&txn, KEYS, key_id.get(), &record)?;
            txn.open_table(AVAILABLE_KEYS).map_err(io)?.insert(key_id.get(), ()).map_err(io)?;
        }

        txn.commit().map_err(io)?;
        Ok(key_id)
    }

    fn key_reference(&self, key_id: KeyId) -> Result<Option<SubmissionId>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(KEY_REFERENCES).map_err(io)?;

        Ok(table.get(key_id.get()).map_err(io)?.map(|value| SubmissionId::new(value.value())))
    }
}

/// Map any redb error to `StorageError::Io`.
fn io(err: impl Display) -> StorageError {
    StorageError::Io(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Read a CBOR row inside a write transaction.
fn read_row<T: DeserializeOwned>(
    txn: &WriteTransaction,
    table: TableDefinition<'static, u64, &'static [u8]>,
    id: u64,
) -> Result<Option<T>, StorageError> {
    let table = txn.open_table(table).map_err(io)?;
    match table.get(id).map_err(io)? {
        Some(value) => Ok(Some(decode(value.value())?)),
        None => Ok(None),
    }
}

/// Write a CBOR row inside a write transaction.
fn write_row<T: Serialize>(
    txn: &WriteTransaction,
    table: TableDefinition<'static, u64, &'static [u8]>,
    id: u64,
    value: &T,
) -> Result<(), StorageError> {
    let bytes = encode(value)?;
    txn.open_table(table).map_err(io)?.insert(id, bytes.as_slice()).map_err(io)?;
    Ok(())
}

/// Take the next value of a sequential counter. Ids start at 1.
fn next_id(txn: &WriteTransaction, counter: &str) -> Result<u64, StorageError> {
    let mut counters = txn.open_table(COUNTERS).map_err(io)?;
    let id = counters.get(counter).map_err(io)?.map_or(1, |value| value.value());
    counters.insert(counter, id + 1).map_err(io)?;
    Ok(id)
}

fn ensure_unreferenced(txn: &WriteTransaction, key_id: KeyId) -> Result<(), StorageError> {
    let references = txn.open_table(KEY_REFERENCES).map_err(io)?;
    match references.get(key_id.get()).map_err(io)? {
        Some(submission) => {
            Err(StorageError::KeyInUse { key_id, submission_id: SubmissionId::new(submission.value()) })
        },
        None => Ok(()),
    }
}
