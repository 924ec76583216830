//! Per-submission symmetric encryption.
//!
//! AES-128-CBC with PKCS#7 padding, authenticated with HMAC-SHA256
//! (encrypt-then-MAC). The `ciphertext` field of an [`Envelope`] is the CBC
//! output followed by the 32-byte tag.
//!
//! `encrypt_with_iv` is pure; `encrypt` draws the IV from the caller's RNG.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// Symmetric key size in bytes (AES-128).
pub const SYMMETRIC_KEY_LEN: usize = 16;

/// CBC initialization vector size in bytes.
pub const IV_LEN: usize = 16;

/// HMAC-SHA256 tag size appended to the ciphertext.
pub const TAG_LEN: usize = 32;

/// AES block size
const BLOCK_LEN: usize = 16;

/// HKDF label for the cipher subkey
const ENC_LABEL: &[u8] = b"whistledropEnvelopeEncV1";

/// HKDF label for the MAC subkey
const MAC_LABEL: &[u8] = b"whistledropEnvelopeMacV1";

/// A per-submission symmetric key.
///
/// Generated fresh for every upload, wrapped for the recipient, then
/// dropped. Zeroized on drop.
#[derive(Clone)]
pub struct SymmetricKey {
    key: [u8; SYMMETRIC_KEY_LEN],
}

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(key: [u8; SYMMETRIC_KEY_LEN]) -> Self {
        Self { key }
    }

    /// Key from a slice, `None` unless it is exactly [`SYMMETRIC_KEY_LEN`]
    /// bytes.
    pub fn try_from_slice(bytes: &[u8]) -> Option<Self> {
        let key: [u8; SYMMETRIC_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self { key })
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_LEN] {
        &self.key
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Encrypted file contents: IV plus authenticated ciphertext.
///
/// Both fields are opaque bytes. Serialized as base64 strings so the
/// envelope can be embedded in JSON as `{"iv": ..., "ciphertext": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// CBC initialization vector, [`IV_LEN`] bytes
    #[serde(with = "crate::serde_b64")]
    pub iv: Vec<u8>,
    /// CBC ciphertext followed by a [`TAG_LEN`]-byte HMAC tag
    #[serde(with = "crate::serde_b64")]
    pub ciphertext: Vec<u8>,
}

/// Subkeys derived from a [`SymmetricKey`], zeroized on drop.
struct SubKeys {
    enc: [u8; SYMMETRIC_KEY_LEN],
    mac: [u8; 32],
}

impl Drop for SubKeys {
    fn drop(&mut self) {
        self.enc.zeroize();
        self.mac.zeroize();
    }
}

/// Generate a fresh random symmetric key.
pub fn generate_key(rng: &mut impl CryptoRngCore) -> SymmetricKey {
    let mut key = [0u8; SYMMETRIC_KEY_LEN];
    rng.fill_bytes(&mut key);
    SymmetricKey { key }
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
///
/// Every call draws a new IV, so encrypting the same plaintext twice with
/// the same key yields unrelated envelopes.
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey, rng: &mut impl CryptoRngCore) -> Envelope {
    let mut iv = [0u8; IV_LEN];
    rng.fill_bytes(&mut iv);
    encrypt_with_iv(plaintext, key, iv)
}

/// Encrypt `plaintext` under `key` with a caller-chosen IV.
///
/// # Security
///
/// The IV MUST be unpredictable and never reused with the same key. Use
/// [`encrypt`] unless the IV comes from a cryptographic RNG already.
pub fn encrypt_with_iv(plaintext: &[u8], key: &SymmetricKey, iv: [u8; IV_LEN]) -> Envelope {
    let subkeys = derive_subkeys(key);

    let mut ciphertext = Aes128CbcEnc::new((&subkeys.enc).into(), (&iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let tag = envelope_mac(&subkeys.mac, &iv, &ciphertext).finalize().into_bytes();
    ciphertext.extend_from_slice(&tag);

    Envelope { iv: iv.to_vec(), ciphertext }
}

/// Decrypt an envelope.
///
/// # Errors
///
/// - `MalformedEnvelope`: IV is not [`IV_LEN`] bytes
/// - `PaddingInvalid`: tag mismatch, misaligned ciphertext, or bad padding
///   (wrong key or tampering). Not distinguished further.
pub fn decrypt(envelope: &Envelope, key: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
    let iv: [u8; IV_LEN] =
        envelope.iv.as_slice().try_into().map_err(|_| CryptoError::MalformedEnvelope {
            reason: format!("iv must be {IV_LEN} bytes, got {}", envelope.iv.len()),
        })?;

    let Some(body_len) = envelope.ciphertext.len().checked_sub(TAG_LEN) else {
        return Err(CryptoError::PaddingInvalid);
    };
    let (body, tag) = envelope.ciphertext.split_at(body_len);

    if body.is_empty() || body.len() % BLOCK_LEN != 0 {
        return Err(CryptoError::PaddingInvalid);
    }

    let subkeys = derive_subkeys(key);

    envelope_mac(&subkeys.mac, &iv, body)
        .verify_slice(tag)
        .map_err(|_| CryptoError::PaddingInvalid)?;

    Aes128CbcDec::new((&subkeys.enc).into(), (&iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(body)
        .map_err(|_| CryptoError::PaddingInvalid)
}

/// Split the submission key into independent cipher and MAC subkeys.
fn derive_subkeys(key: &SymmetricKey) -> SubKeys {
    let hkdf = Hkdf::<Sha256>::new(None, &key.key);

    let mut subkeys = SubKeys { enc: [0u8; SYMMETRIC_KEY_LEN], mac: [0u8; 32] };
    let Ok(()) = hkdf.expand(ENC_LABEL, &mut subkeys.enc) else {
        unreachable!("16 bytes is a valid HKDF-SHA256 output length");
    };
    let Ok(()) = hkdf.expand(MAC_LABEL, &mut subkeys.mac) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    subkeys
}

/// HMAC over `iv || ciphertext`.
fn envelope_mac(mac_key: &[u8; 32], iv: &[u8; IV_LEN], ciphertext: &[u8]) -> HmacSha256 {
    let Ok(mut mac) = HmacSha256::new_from_slice(mac_key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(iv);
    mac.update(ciphertext);
    mac
}
