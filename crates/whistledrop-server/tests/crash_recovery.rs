//! Restart tests for `RedbStorage`.
//!
//! Pool state and submissions must survive a close/reopen of the database
//! file, simulating a server restart.

mod common;

use common::{public_keys, recipients};
use tempfile::tempdir;
use whistledrop_core::KeyId;
use whistledrop_crypto::{decrypt, unwrap_key};
use whistledrop_harness::{SimEnv, check_invariants};
use whistledrop_server::{
    Intake, IntakeConfig, KeyPool, KeyState, PoolError, RedbStorage, Storage, SubmissionStore,
};

#[test]
fn pool_and_submissions_survive_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("pool.redb");

    let receipt = {
        let storage = RedbStorage::open(&db_path).unwrap();
        let intake = Intake::new(storage, SimEnv::with_seed(1), IntakeConfig::default());
        for key in public_keys(3) {
            intake.pool().import_key(&key).unwrap();
        }
        intake.submit("report.pdf", b"survives restarts").unwrap()

        // Database dropped
    };

    let storage = RedbStorage::open(&db_path).unwrap();
    check_invariants(&storage).unwrap();

    let keys = storage.list_keys().unwrap();
    assert_eq!(keys.len(), 3);
    assert!(matches!(keys[0].state, KeyState::Allocated { .. }));
    assert!(keys[1..].iter().all(|record| record.state.is_available()));

    let store = SubmissionStore::new(storage.clone(), SimEnv::with_seed(2));
    let submission = store.fetch(receipt.submission_id).unwrap();
    let key = unwrap_key(&submission.wrapped_key, &recipients()[0]).unwrap();
    assert_eq!(decrypt(&submission.envelope, &key).unwrap(), b"survives restarts");
}

#[test]
fn ids_continue_after_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("pool.redb");

    {
        let pool = KeyPool::new(RedbStorage::open(&db_path).unwrap(), SimEnv::with_seed(1));
        pool.import_key(&public_keys(1)[0]).unwrap();
        pool.delete(KeyId::new(1)).unwrap();
    }

    let pool = KeyPool::new(RedbStorage::open(&db_path).unwrap(), SimEnv::with_seed(1));
    assert_eq!(pool.import_key(&public_keys(2)[1]).unwrap(), KeyId::new(2));
}

#[test]
fn duplicate_detection_survives_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("pool.redb");
    let key = &public_keys(1)[0];

    {
        let pool = KeyPool::new(RedbStorage::open(&db_path).unwrap(), SimEnv::with_seed(1));
        pool.import_key(key).unwrap();
    }

    let pool = KeyPool::new(RedbStorage::open(&db_path).unwrap(), SimEnv::with_seed(1));
    let err = pool.import_pem(&key.to_pem().unwrap()).unwrap_err();
    assert!(matches!(err, PoolError::DuplicateKey { existing } if existing == KeyId::new(1)));
}

#[test]
fn allocation_left_open_by_a_crash_needs_reset() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("pool.redb");

    let key_id = {
        let pool = KeyPool::new(RedbStorage::open(&db_path).unwrap(), SimEnv::with_seed(1));
        pool.import_key(&public_keys(1)[0]).unwrap();
        let (key_id, _) = pool.allocate().unwrap();
        key_id

        // Process dies before persisting
    };

    let pool = KeyPool::new(RedbStorage::open(&db_path).unwrap(), SimEnv::with_seed(1));
    assert!(matches!(pool.allocate(), Err(PoolError::NoAvailableKey)));

    pool.reset(key_id).unwrap();
    assert_eq!(pool.allocate().unwrap().0, key_id);
}

#[test]
fn reset_all_recovers_stranded_keys_but_not_submitted_ones() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("pool.redb");

    let receipt = {
        let storage = RedbStorage::open(&db_path).unwrap();
        let intake = Intake::new(storage, SimEnv::with_seed(1), IntakeConfig::default());
        for key in public_keys(3) {
            intake.pool().import_key(&key).unwrap();
        }
        let receipt = intake.submit("kept.txt", b"persisted before the crash").unwrap();
        intake.pool().allocate().unwrap();
        intake.pool().allocate().unwrap();
        receipt

        // Process dies with two uploads in flight
    };

    let pool = KeyPool::new(RedbStorage::open(&db_path).unwrap(), SimEnv::with_seed(1));
    assert_eq!(pool.reset_all().unwrap(), vec![KeyId::new(2), KeyId::new(3)]);

    check_invariants(pool.storage()).unwrap();
    assert_eq!(pool.status().unwrap().available_keys, 2);
    assert_eq!(pool.storage().key_reference(receipt.key_id).unwrap(), Some(receipt.submission_id));
}
