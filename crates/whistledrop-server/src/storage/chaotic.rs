//! Chaotic storage wrapper for fault injection testing
//!
//! Randomly fails storage operations so tests can check that every failed
//! upload gives its key back and that no fault leaves a key claimed twice.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use whistledrop_core::{KeyId, PoolStatus, Submission, SubmissionId, SubmissionMetadata};

use super::{KeyRecord, NewSubmission, Storage, StorageError};

/// Which operations are eligible for injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChaosScope {
    /// Any operation may fail
    All,
    /// Only `insert_submission` may fail. Simulates a persist fault after a
    /// successful allocation, leaving the compensating release reliable.
    SubmissionWrites,
}

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but fails operations
/// with the configured probability, before they reach the inner store. A
/// failed call therefore never has a partial effect. The RNG state is shared
/// across clones, so a seed fixes the whole failure sequence.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    scope: ChaosScope,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Operations attempted, including failed ones
    operation_count: Arc<AtomicUsize>,
    /// Failures injected
    failure_count: Arc<AtomicUsize>,
    /// Eligible operations left to fail unconditionally
    forced_failures: Arc<AtomicUsize>,
}

/// Simple deterministic RNG for chaos injection
///
/// Linear congruential generator: fast, and reproducible from a seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Wrap `inner`, failing any operation with probability `failure_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            scope: ChaosScope::All,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
            failure_count: Arc::new(AtomicUsize::new(0)),
            forced_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Restrict injected failures to `scope`.
    #[must_use]
    pub fn with_scope(mut self, scope: ChaosScope) -> Self {
        self.scope = scope;
        self
    }

    /// Fail the next `count` operations within scope, whatever the rate.
    /// Shared across clones.
    pub fn fail_next(&self, count: usize) {
        self.forced_failures.store(count, Ordering::Relaxed);
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    /// Number of failures injected so far.
    pub fn failure_count(&self) -> usize {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Count the operation and decide whether it fails.
    fn inject(&self, submission_write: bool) -> Result<(), StorageError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);

        if self.scope == ChaosScope::SubmissionWrites && !submission_write {
            return Ok(());
        }

        let forced = self
            .forced_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::Io("forced failure injection".to_string()));
        }

        #[allow(clippy::expect_used)]
        let roll = self.rng.lock().expect("ChaoticRng mutex poisoned").next();
        if roll < self.failure_rate {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }

        Ok(())
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn insert_key(&self, public_key: &[u8], created_at_secs: u64) -> Result<KeyId, StorageError> {
        self.inject(false)?;
        self.inner.insert_key(public_key, created_at_secs)
    }

    fn allocate_key(&self, at_secs: u64) -> Result<Option<(KeyId, Vec<u8>)>, StorageError> {
        self.inject(false)?;
        self.inner.allocate_key(at_secs)
    }

    fn release_key(&self, key_id: KeyId) -> Result<bool, StorageError> {
        self.inject(false)?;
        self.inner.release_key(key_id)
    }

    fn load_key(&self, key_id: KeyId) -> Result<Option<KeyRecord>, StorageError> {
        self.inject(false)?;
        self.inner.load_key(key_id)
    }

    fn list_keys(&self) -> Result<Vec<KeyRecord>, StorageError> {
        self.inject(false)?;
        self.inner.list_keys()
    }

    fn delete_key(&self, key_id: KeyId) -> Result<(), StorageError> {
        self.inject(false)?;
        self.inner.delete_key(key_id)
    }

    fn pool_status(&self) -> Result<PoolStatus, StorageError> {
        self.inject(false)?;
        self.inner.pool_status()
    }

    fn insert_submission(&self, submission: &NewSubmission) -> Result<SubmissionId, StorageError> {
        self.inject(true)?;
        self.inner.insert_submission(submission)
    }

    fn load_submission(&self, id: SubmissionId) -> Result<Option<Submission>, StorageError> {
        self.inject(false)?;
        self.inner.load_submission(id)
    }

    fn list_submissions(&self) -> Result<Vec<SubmissionMetadata>, StorageError> {
        self.inject(false)?;
        self.inner.list_submissions()
    }

    fn purge_submission(&self, id: SubmissionId) -> Result<KeyId, StorageError> {
        self.inject(false)?;
        self.inner.purge_submission(id)
    }

    fn key_reference(&self, key_id: KeyId) -> Result<Option<SubmissionId>, StorageError> {
        self.inject(false)?;
        self.inner.key_reference(key_id)
    }
}

#[cfg(test)]
mod tests {
    use whistledrop_crypto::Envelope;

    use super::*;
    use crate::storage::MemoryStorage;

    fn new_submission(key_id: KeyId) -> NewSubmission {
        NewSubmission {
            filename: "f.txt".to_string(),
            envelope: Envelope { iv: vec![0; 16], ciphertext: vec![0; 48] },
            wrapped_key: vec![0; 128],
            key_id,
            created_at: 0,
        }
    }

    #[test]
    fn zero_failure_rate_never_fails() {
        let chaotic = ChaoticStorage::new(MemoryStorage::new(), 0.0);

        for i in 0u8..100 {
            chaotic.insert_key(&[i], 0).expect("should not fail with 0% rate");
        }

        assert_eq!(chaotic.pool_status().unwrap().total_keys, 100);
        assert_eq!(chaotic.failure_count(), 0);
    }

    #[test]
    fn full_failure_rate_always_fails() {
        let chaotic = ChaoticStorage::new(MemoryStorage::new(), 1.0);

        assert!(chaotic.insert_key(b"k", 0).is_err());
        assert!(chaotic.allocate_key(0).is_err());
        assert!(chaotic.list_submissions().is_err());
        assert_eq!(chaotic.operation_count(), 3);
        assert_eq!(chaotic.failure_count(), 3);
    }

    #[test]
    fn injected_failures_are_retryable() {
        let chaotic = ChaoticStorage::new(MemoryStorage::new(), 1.0);
        assert!(chaotic.pool_status().unwrap_err().is_retryable());
    }

    #[test]
    fn fail_next_forces_exact_number_of_failures() {
        let chaotic = ChaoticStorage::new(MemoryStorage::new(), 0.0);
        let clone = chaotic.clone();

        chaotic.fail_next(2);

        assert!(clone.insert_key(b"a", 0).is_err());
        assert!(chaotic.insert_key(b"a", 0).is_err());
        assert!(chaotic.insert_key(b"a", 0).is_ok());
        assert_eq!(chaotic.failure_count(), 2);
    }

    #[test]
    fn deterministic_with_seed() {
        let chaotic1 = ChaoticStorage::with_seed(MemoryStorage::new(), 0.5, 42);
        let chaotic2 = ChaoticStorage::with_seed(MemoryStorage::new(), 0.5, 42);

        for i in 0u8..100 {
            let result1 = chaotic1.insert_key(&[i], 0);
            let result2 = chaotic2.insert_key(&[i], 0);

            assert_eq!(result1.is_ok(), result2.is_ok(), "determinism violated at iteration {i}");
        }
    }

    #[test]
    fn submission_scope_spares_pool_operations() {
        let chaotic =
            ChaoticStorage::new(MemoryStorage::new(), 1.0).with_scope(ChaosScope::SubmissionWrites);

        let key_id = chaotic.insert_key(b"k", 0).unwrap();
        chaotic.allocate_key(1).unwrap().unwrap();

        assert!(chaotic.insert_submission(&new_submission(key_id)).is_err());
        assert!(chaotic.release_key(key_id).unwrap());
        assert_eq!(chaotic.failure_count(), 1);
    }

    #[test]
    fn failures_do_not_reach_inner_storage() {
        let chaotic = ChaoticStorage::new(MemoryStorage::new(), 1.0);

        let _ = chaotic.insert_key(b"k", 0);

        assert_eq!(chaotic.inner().pool_status().unwrap().total_keys, 0);
    }

    #[test]
    #[should_panic(expected = "failure_rate must be between 0.0 and 1.0")]
    fn rejects_invalid_failure_rate() {
        let _chaotic = ChaoticStorage::new(MemoryStorage::new(), 1.5);
    }
}
