//! Fetch, unwrap, decrypt.

use whistledrop_core::{Keystore, Submission, SubmissionId, SubmissionSource};
use whistledrop_crypto::{decrypt, unwrap_key};

use crate::error::RetrievalError;

/// Fetch submission `id` from `source` and decrypt it with `keystore`.
///
/// Does not modify the source; calling it again returns the same plaintext.
///
/// # Errors
///
/// - `NotFound` if the source has no such submission
/// - `Source` if the source itself fails
/// - as [`open`] otherwise
pub fn retrieve<S: SubmissionSource>(
    source: &S,
    id: SubmissionId,
    keystore: &Keystore,
) -> Result<Vec<u8>, RetrievalError> {
    let submission = source
        .fetch_submission(id)
        .map_err(|err| RetrievalError::Source(Box::new(err)))?
        .ok_or(RetrievalError::NotFound(id))?;

    open(&submission, keystore)
}

/// Decrypt a submission already in hand.
///
/// # Errors
///
/// - `NoMatchingKey` if `keystore` has no entry for the submission's key
/// - `Crypto(UnwrapFailed)` if that entry is not the key the symmetric key
///   was wrapped for
/// - `Crypto(PaddingInvalid)` if the envelope was altered
pub fn open(submission: &Submission, keystore: &Keystore) -> Result<Vec<u8>, RetrievalError> {
    let key_id = submission.key_id;
    let private_key = keystore.get(key_id).ok_or(RetrievalError::NoMatchingKey(key_id))?;

    let plaintext = unwrap_key(&submission.wrapped_key, private_key)
        .and_then(|symmetric_key| decrypt(&submission.envelope, &symmetric_key))
        .inspect_err(|err| {
            tracing::warn!(submission_id = %submission.id, %key_id, error = %err, "retrieval failed");
        })?;

    tracing::debug!(
        submission_id = %submission.id,
        %key_id,
        size = plaintext.len(),
        "opened submission"
    );
    Ok(plaintext)
}
