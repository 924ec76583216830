//! Key pool behaviour under injected storage faults.
//!
//! Properties checked after every run, on the inner backend:
//! - every successful upload references a distinct Allocated key
//! - an upload that failed to persist left its key Available
//! - the standard storage invariants hold

mod common;

use std::collections::HashSet;

use common::public_keys;
use proptest::prelude::*;
use whistledrop_harness::{SimEnv, check_invariants};
use whistledrop_server::{
    ChaosScope, ChaoticStorage, Intake, IntakeConfig, IntakeError, KeyPool, MemoryStorage,
    PoolError, Storage,
};

fn import_all<S: Storage>(storage: &S, n: usize) {
    let pool = KeyPool::new(storage.clone(), SimEnv::with_seed(0));
    for key in public_keys(n) {
        pool.import_key(&key).unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn persist_faults_never_leak_keys(
        failure_rate in 0.0..0.9f64,
        seed in any::<u64>(),
        keys in 1usize..8,
        uploads in 1usize..16,
    ) {
        let inner = MemoryStorage::new();
        import_all(&inner, keys);

        let chaotic = ChaoticStorage::with_seed(inner.clone(), failure_rate, seed)
            .with_scope(ChaosScope::SubmissionWrites);
        let intake = Intake::new(chaotic, SimEnv::with_seed(seed), IntakeConfig::default());

        let mut stored = Vec::new();
        for i in 0..uploads {
            match intake.submit(&format!("upload-{i}.txt"), &[i as u8; 40]) {
                Ok(receipt) => stored.push(receipt),
                Err(IntakeError::Persist(err)) => prop_assert!(err.is_retryable()),
                Err(IntakeError::Pool(PoolError::NoAvailableKey)) => {
                    prop_assert_eq!(stored.len(), keys);
                },
                Err(err) => return Err(TestCaseError::fail(format!("unexpected error: {err}"))),
            }
        }

        let distinct: HashSet<_> = stored.iter().map(|r| r.key_id).collect();
        prop_assert_eq!(distinct.len(), stored.len());

        let status = inner.pool_status().unwrap();
        prop_assert_eq!(status.used_keys, stored.len() as u64);
        prop_assert_eq!(status.available_keys, (keys - stored.len()) as u64);

        if let Err(violations) = check_invariants(&inner) {
            return Err(TestCaseError::fail(format!("{violations:?}")));
        }
    }

    #[test]
    fn arbitrary_faults_preserve_invariants(
        failure_rate in 0.0..0.6f64,
        seed in any::<u64>(),
        uploads in 1usize..12,
        purges in prop::collection::vec(any::<bool>(), 12),
    ) {
        let inner = MemoryStorage::new();
        import_all(&inner, 4);

        let chaotic = ChaoticStorage::with_seed(inner.clone(), failure_rate, seed);
        let intake = Intake::new(chaotic, SimEnv::with_seed(seed), IntakeConfig::default());

        for i in 0..uploads {
            if let Ok(receipt) = intake.submit("doc.pdf", &[0xAB; 16]) {
                if purges[i] {
                    let _ = intake.store().purge(receipt.submission_id);
                }
            }
        }

        if let Err(violations) = check_invariants(&inner) {
            return Err(TestCaseError::fail(format!("{violations:?}")));
        }
    }

    #[test]
    fn allocate_then_release_restores_availability(
        keys in 1usize..6,
        preallocated in 0usize..6,
    ) {
        let pool = KeyPool::new(MemoryStorage::new(), SimEnv::with_seed(7));
        for key in public_keys(keys) {
            pool.import_key(&key).unwrap();
        }
        for _ in 0..preallocated.min(keys) {
            pool.allocate().unwrap();
        }

        let before = pool.status().unwrap();
        match pool.allocate() {
            Ok((key_id, _)) => pool.release(key_id).unwrap(),
            Err(err) => prop_assert!(matches!(err, PoolError::NoAvailableKey)),
        }

        prop_assert_eq!(pool.status().unwrap(), before);
    }
}
