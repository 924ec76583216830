//! Environment abstraction for deterministic testing.
//!
//! Decouples pool and intake logic from system resources (wall clock,
//! randomness). Production uses the OS; tests use a seeded simulation so a
//! failing run can be replayed from its seed.

use rand_core::{CryptoRng, RngCore};

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production;
///   it feeds symmetric keys, IVs and OAEP seeds
/// - Methods are infallible except in exceptional circumstances (OS entropy
///   exhaustion, broken simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Seconds since the Unix epoch, used for allocation and creation
    /// timestamps.
    ///
    /// # Invariants
    ///
    /// - Never decreases within one process. Simulations advance it
    ///   explicitly.
    fn wall_clock_secs(&self) -> u64;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same seed, a simulation produces the same sequence
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Borrows an [`Environment`] as a `rand_core` RNG.
///
/// Lets the crypto layer, which takes `CryptoRngCore`, draw from whatever
/// environment the caller runs under.
pub struct EnvRng<'a, E> {
    env: &'a E,
}

impl<'a, E: Environment> EnvRng<'a, E> {
    /// Wrap an environment.
    pub fn new(env: &'a E) -> Self {
        Self { env }
    }
}

impl<E: Environment> RngCore for EnvRng<'_, E> {
    fn next_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        self.env.random_bytes(&mut bytes);
        u32::from_be_bytes(bytes)
    }

    fn next_u64(&mut self) -> u64 {
        self.env.random_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.env.random_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.env.random_bytes(dest);
        Ok(())
    }
}

/// `Environment::random_bytes` is required to be cryptographically secure.
impl<E: Environment> CryptoRng for EnvRng<'_, E> {}
