//! End-to-end upload scenarios over the in-memory backend.

mod common;

use common::{public_keys, recipients};
use whistledrop_core::{KeyId, SubmissionId};
use whistledrop_crypto::{decrypt, unwrap_key};
use whistledrop_harness::{SimEnv, check_invariants};
use whistledrop_server::{
    ChaosScope, ChaoticStorage, Intake, IntakeConfig, IntakeError, KeyPool, KeyState,
    MemoryStorage, PoolError, Storage, SubmissionError,
};

fn intake_with_keys(n: usize) -> Intake<MemoryStorage, SimEnv> {
    let intake = Intake::new(MemoryStorage::new(), SimEnv::with_seed(1), IntakeConfig::default());
    for key in public_keys(n) {
        intake.pool().import_key(&key).unwrap();
    }
    intake
}

#[test]
fn second_upload_rejected_when_single_key_is_used() {
    let intake = intake_with_keys(1);

    let first = intake.submit("a.pdf", b"upload A").unwrap();
    assert_eq!(first.key_id, KeyId::new(1));

    let err = intake.submit("b.pdf", b"upload B").unwrap_err();
    assert!(matches!(err, IntakeError::Pool(PoolError::NoAvailableKey)));
    assert!(!err.is_retryable());

    let status = intake.pool().status().unwrap();
    assert_eq!((status.total_keys, status.available_keys, status.used_keys), (1, 0, 1));
    check_invariants(intake.pool().storage()).unwrap();
}

#[test]
fn failed_persist_makes_key_allocatable_again() {
    let storage =
        ChaoticStorage::new(MemoryStorage::new(), 1.0).with_scope(ChaosScope::SubmissionWrites);
    let intake = Intake::new(storage.clone(), SimEnv::with_seed(2), IntakeConfig::default());
    let k1 = intake.pool().import_key(&public_keys(1)[0]).unwrap();

    let err = intake.submit("a.txt", b"never stored").unwrap_err();
    assert!(matches!(err, IntakeError::Persist(SubmissionError::PersistenceFailure(_))));

    assert_eq!(storage.failure_count(), 1);
    assert_eq!(storage.inner().load_key(k1).unwrap().unwrap().state, KeyState::Available);
    assert!(storage.inner().list_submissions().unwrap().is_empty());

    let pool = KeyPool::new(storage.inner().clone(), SimEnv::with_seed(3));
    assert_eq!(pool.allocate().unwrap().0, k1);
}

#[test]
fn stored_submission_decrypts_with_matching_recipient() {
    let intake = intake_with_keys(3);
    intake.submit("first.txt", b"one").unwrap();
    intake.submit("second.txt", b"two").unwrap();

    let receipt = intake.submit("third.docx", b"three").unwrap();
    let submission = intake.store().fetch(receipt.submission_id).unwrap();
    assert_eq!(submission.key_id, KeyId::new(3));

    let key = unwrap_key(&submission.wrapped_key, &recipients()[2]).unwrap();
    assert_eq!(decrypt(&submission.envelope, &key).unwrap(), b"three");

    assert!(unwrap_key(&submission.wrapped_key, &recipients()[0]).is_err());
}

#[test]
fn purge_returns_key_for_next_upload() {
    let intake = intake_with_keys(1);
    let receipt = intake.submit("a.txt", b"first").unwrap();

    let err = intake.pool().reset(receipt.key_id).unwrap_err();
    assert!(matches!(err, PoolError::KeyInUse { submission_id, .. } if submission_id == receipt.submission_id));

    assert_eq!(intake.store().purge(receipt.submission_id).unwrap(), receipt.key_id);

    let next = intake.submit("b.txt", b"second").unwrap();
    assert_eq!(next.key_id, receipt.key_id);
    assert_eq!(next.submission_id, SubmissionId::new(2));
    check_invariants(intake.pool().storage()).unwrap();
}

#[test]
fn envelopes_use_fresh_keys_and_ivs() {
    let intake = intake_with_keys(2);
    let a = intake.submit("a.txt", b"identical contents").unwrap();
    let b = intake.submit("b.txt", b"identical contents").unwrap();

    let a = intake.store().fetch(a.submission_id).unwrap();
    let b = intake.store().fetch(b.submission_id).unwrap();

    assert_ne!(a.envelope.iv, b.envelope.iv);
    assert_ne!(a.envelope.ciphertext, b.envelope.ciphertext);
}

#[test]
fn submission_timestamps_follow_the_clock() {
    let env = SimEnv::with_seed(4);
    let intake = Intake::new(MemoryStorage::new(), env.clone(), IntakeConfig::default());
    intake.pool().import_key(&public_keys(1)[0]).unwrap();

    env.advance(3_600);
    let receipt = intake.submit("late.pdf", b"x").unwrap();

    let submission = intake.store().fetch(receipt.submission_id).unwrap();
    let record = intake.pool().storage().load_key(receipt.key_id).unwrap().unwrap();
    assert_eq!(record.state, KeyState::Allocated { at_secs: submission.created_at });
    assert_eq!(submission.created_at, record.created_at_secs + 3_600);
}
