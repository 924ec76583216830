//! Simulated environment.
//!
//! Clones share one RNG stream and one clock, like clones of a real
//! environment share the OS RNG and the system clock.

#![allow(clippy::disallowed_types, reason = "RNG state is locked for a single fill")]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use rand_chacha::{
    ChaCha20Rng,
    rand_core::{RngCore, SeedableRng},
};
use whistledrop_core::Environment;

/// Unix seconds a fresh [`SimEnv`] starts at (2023-11-14).
pub const SIM_EPOCH_SECS: u64 = 1_700_000_000;

/// Deterministic [`Environment`]: ChaCha20 seeded RNG and a clock that only
/// moves when told to.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    clock: Arc<AtomicU64>,
}

impl SimEnv {
    /// Environment whose randomness is fully determined by `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            clock: Arc::new(AtomicU64::new(SIM_EPOCH_SECS)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, secs: u64) {
        self.clock.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Environment for SimEnv {
    fn wall_clock_secs(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("sim RNG mutex poisoned").fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bytes() {
        let (a, b) = (SimEnv::with_seed(9), SimEnv::with_seed(9));

        let mut left = [0u8; 48];
        let mut right = [0u8; 48];
        a.random_bytes(&mut left);
        b.random_bytes(&mut right);

        assert_eq!(left, right);
        assert_ne!(a.random_u64(), SimEnv::with_seed(10).random_u64());
    }

    #[test]
    fn clock_is_shared_between_clones() {
        let env = SimEnv::with_seed(0);
        let clone = env.clone();

        clone.advance(90);

        assert_eq!(env.wall_clock_secs(), SIM_EPOCH_SECS + 90);
    }
}
