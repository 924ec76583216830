//! Upload on the server side, retrieve on the recipient side.

use whistledrop_client::{RetrievalError, open, retrieve};
use whistledrop_core::{KeyId, Keystore, Submission};
use whistledrop_crypto::CryptoError;
use whistledrop_harness::SimEnv;
use whistledrop_server::{Intake, IntakeConfig, KeyPool, MemoryStorage, RedbStorage};

/// Provision `n` keys into a fresh pool and return the recipient's keystore.
fn provisioned_intake(n: usize) -> (Intake<MemoryStorage, SimEnv>, Keystore) {
    let env = SimEnv::with_seed(77);
    let storage = MemoryStorage::new();

    let mut keystore = Keystore::new();
    for (key_id, private_key) in KeyPool::new(storage.clone(), env.clone()).provision(n, 1024).unwrap() {
        keystore.insert(key_id, private_key);
    }

    (Intake::new(storage, env, IntakeConfig::default()), keystore)
}

#[test]
fn key_seven_opens_only_with_its_own_private_key() {
    let (intake, keystore) = provisioned_intake(8);
    for i in 0..6 {
        intake.submit(&format!("filler-{i}.txt"), b"filler").unwrap();
    }

    let receipt = intake.submit("memo.pdf", b"the seventh upload").unwrap();
    assert_eq!(receipt.key_id, KeyId::new(7));

    let plaintext = retrieve(intake.store(), receipt.submission_id, &keystore).unwrap();
    assert_eq!(plaintext, b"the seventh upload");

    let mut wrong = Keystore::new();
    wrong.insert(KeyId::new(7), keystore.get(KeyId::new(8)).unwrap().clone());
    let err = retrieve(intake.store(), receipt.submission_id, &wrong).unwrap_err();
    assert!(matches!(err, RetrievalError::Crypto(CryptoError::UnwrapFailed)));
}

#[test]
fn keystore_file_round_trips_through_disk() {
    let (intake, keystore) = provisioned_intake(2);
    let receipt = intake.submit("notes.txt", b"saved keys still work").unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.json");
    keystore.save(&path).unwrap();
    let loaded = Keystore::load(&path).unwrap();

    assert_eq!(loaded.len(), 2);
    assert_eq!(
        retrieve(intake.store(), receipt.submission_id, &loaded).unwrap(),
        b"saved keys still work"
    );
}

#[test]
fn exported_record_opens_without_the_database() {
    let (intake, keystore) = provisioned_intake(1);
    let receipt = intake.submit("photo.pdf", &[0x89; 300]).unwrap();

    let json = serde_json::to_string(&intake.store().fetch(receipt.submission_id).unwrap()).unwrap();
    let record: Submission = serde_json::from_str(&json).unwrap();

    assert_eq!(open(&record, &keystore).unwrap(), vec![0x89; 300]);
}

#[test]
fn retrieval_leaves_the_store_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let env = SimEnv::with_seed(5);
    let storage = RedbStorage::open(dir.path().join("pool.redb")).unwrap();

    let mut keystore = Keystore::new();
    for (key_id, private_key) in KeyPool::new(storage.clone(), env.clone()).provision(1, 1024).unwrap() {
        keystore.insert(key_id, private_key);
    }
    let intake = Intake::new(storage, env, IntakeConfig::default());
    let receipt = intake.submit("a.txt", b"read me twice").unwrap();

    let before = intake.pool().status().unwrap();
    for _ in 0..3 {
        assert_eq!(retrieve(intake.store(), receipt.submission_id, &keystore).unwrap(), b"read me twice");
    }

    assert_eq!(intake.pool().status().unwrap(), before);
    assert_eq!(intake.store().list().unwrap().len(), 1);
}

#[test]
fn missing_key_reports_the_key_id() {
    let (intake, _) = provisioned_intake(1);
    let receipt = intake.submit("a.txt", b"x").unwrap();

    let err = retrieve(intake.store(), receipt.submission_id, &Keystore::new()).unwrap_err();

    assert!(matches!(err, RetrievalError::NoMatchingKey(id) if id == receipt.key_id));
}
