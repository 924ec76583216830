//! WhistleDrop Cryptographic Primitives
//!
//! The hybrid encryption used for every submission. Pure functions with no
//! shared state; callers provide randomness as a [`rand_core::CryptoRngCore`]
//! so tests can run against a seeded generator.
//!
//! # Envelope Lifecycle
//!
//! ```text
//! generate_key ──► SymmetricKey (128-bit, one per submission)
//!                      │
//!      ┌───────────────┴───────────────┐
//!      ▼                               ▼
//! encrypt(file) ──► Envelope      wrap_key(recipient public key)
//!   { iv, ciphertext }                 │
//!                                      ▼
//!                               wrapped key (modulus-sized)
//! ```
//!
//! The recipient reverses it: [`unwrap_key`] with the matching private key,
//! then [`decrypt`].
//!
//! # Security
//!
//! Confidentiality:
//! - AES-128-CBC with PKCS#7 padding, fresh random IV per call
//! - RSA-OAEP (SHA-256) wrapping, randomized on every call
//!
//! Integrity:
//! - Encrypt-then-MAC: HMAC-SHA256 over `iv || cbc ciphertext`, verified in
//!   constant time before unpadding
//! - Tag mismatch, misaligned ciphertext and bad padding are one error
//!   ([`CryptoError::PaddingInvalid`]) so failures cannot be told apart
//! - Any wrap failure is [`CryptoError::UnwrapFailed`], never more specific
//!
//! Key hygiene:
//! - Symmetric keys and derived subkeys are zeroized on drop
//! - `Debug` output never contains key material

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod envelope;
mod error;
mod keys;
pub mod serde_b64;
mod wrap;

pub use envelope::{
    Envelope, IV_LEN, SYMMETRIC_KEY_LEN, SymmetricKey, TAG_LEN, decrypt, encrypt, encrypt_with_iv,
    generate_key,
};
pub use error::CryptoError;
pub use keys::{
    DEFAULT_MODULUS_BITS, MIN_MODULUS_BITS, RecipientPrivateKey, RecipientPublicKey,
    generate_key_pair,
};
pub use rand_core::CryptoRngCore;
pub use wrap::{unwrap_key, wrap_key};
