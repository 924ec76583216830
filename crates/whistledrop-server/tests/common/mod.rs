//! Shared fixtures for server integration tests.

#![allow(dead_code)]

use std::sync::OnceLock;

use whistledrop_core::EnvRng;
use whistledrop_crypto::{RecipientPrivateKey, RecipientPublicKey, generate_key_pair};
use whistledrop_harness::SimEnv;

/// Recipient key pairs generated once per test binary. 1024-bit keeps
/// generation fast; every code path is size-independent.
pub fn recipients() -> &'static [RecipientPrivateKey] {
    static KEYS: OnceLock<Vec<RecipientPrivateKey>> = OnceLock::new();
    KEYS.get_or_init(|| {
        let env = SimEnv::with_seed(0xD209);
        let mut rng = EnvRng::new(&env);
        (0..16).map(|_| generate_key_pair(&mut rng, 1024).unwrap()).collect()
    })
}

/// Public halves of the first `n` recipients.
pub fn public_keys(n: usize) -> Vec<RecipientPublicKey> {
    recipients()[..n].iter().map(RecipientPrivateKey::public_key).collect()
}
