//! RSA-OAEP (SHA-256) wrapping of submission keys.

use rand_core::CryptoRngCore;
use rsa::Oaep;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    envelope::SymmetricKey,
    error::CryptoError,
    keys::{RecipientPrivateKey, RecipientPublicKey},
};

/// Wrap `key` for `recipient`.
///
/// OAEP is randomized: wrapping the same key twice gives different bytes.
/// The output is always [`RecipientPublicKey::modulus_len`] bytes.
///
/// # Errors
///
/// `WrapFailed` if the modulus is too small for OAEP-SHA256.
pub fn wrap_key(
    key: &SymmetricKey,
    recipient: &RecipientPublicKey,
    rng: &mut impl CryptoRngCore,
) -> Result<Vec<u8>, CryptoError> {
    recipient
        .inner()
        .encrypt(rng, Oaep::new::<Sha256>(), key.as_bytes())
        .map_err(|e| CryptoError::WrapFailed { reason: e.to_string() })
}

/// Recover a submission key with the recipient's private key.
///
/// # Errors
///
/// `UnwrapFailed` for a non-matching private key, altered bytes, or a
/// recovered key of the wrong length. The cause is never reported.
pub fn unwrap_key(
    wrapped: &[u8],
    recipient: &RecipientPrivateKey,
) -> Result<SymmetricKey, CryptoError> {
    let recovered = recipient
        .inner()
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::UnwrapFailed)?;

    SymmetricKey::try_from_slice(&recovered).ok_or(CryptoError::UnwrapFailed)
}
