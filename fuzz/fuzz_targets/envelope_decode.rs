//! Fuzz target for envelope decryption
//!
//! # Strategy
//!
//! - Arbitrary IV and ciphertext bytes under an arbitrary key
//! - Valid envelopes with one bit flipped anywhere
//!
//! # Invariants
//!
//! - `decrypt` NEVER panics
//! - Truncated or unaligned input is rejected, not decrypted
//! - A flipped bit in a valid envelope always yields `PaddingInvalid`

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use whistledrop_crypto::{CryptoError, Envelope, SymmetricKey, decrypt, encrypt_with_iv};

#[derive(Debug, Arbitrary)]
enum Input {
    Raw { key: [u8; 16], iv: Vec<u8>, ciphertext: Vec<u8> },
    Tampered { key: [u8; 16], iv: [u8; 16], plaintext: Vec<u8>, bit: u16 },
}

fuzz_target!(|input: Input| {
    match input {
        Input::Raw { key, iv, ciphertext } => {
            let _ = decrypt(&Envelope { iv, ciphertext }, &SymmetricKey::from_bytes(key));
        },
        Input::Tampered { key, iv, plaintext, bit } => {
            let key = SymmetricKey::from_bytes(key);
            let mut envelope = encrypt_with_iv(&plaintext, &key, iv);
            assert_eq!(decrypt(&envelope, &key).as_deref(), Ok(plaintext.as_slice()));

            let total_bits = (envelope.iv.len() + envelope.ciphertext.len()) * 8;
            let bit = usize::from(bit) % total_bits;
            if bit < envelope.iv.len() * 8 {
                envelope.iv[bit / 8] ^= 1 << (bit % 8);
            } else {
                let bit = bit - envelope.iv.len() * 8;
                envelope.ciphertext[bit / 8] ^= 1 << (bit % 8);
            }

            assert_eq!(decrypt(&envelope, &key), Err(CryptoError::PaddingInvalid));
        },
    }
});
