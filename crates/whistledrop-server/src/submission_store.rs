//! Persisted submissions.
//!
//! `persist` and the allocation that preceded it form one logical
//! transaction. The store does not release keys itself: when `persist`
//! fails, the caller releases (see [`Intake`](crate::Intake)).

use whistledrop_core::{
    Environment, KeyId, Submission, SubmissionId, SubmissionMetadata, SubmissionSource,
};
use whistledrop_crypto::Envelope;

use crate::{
    error::SubmissionError,
    storage::{NewSubmission, Storage},
};

/// Submission repository over a [`Storage`] backend.
#[derive(Clone)]
pub struct SubmissionStore<S: Storage, E: Environment> {
    storage: S,
    env: E,
}

impl<S: Storage, E: Environment> SubmissionStore<S, E> {
    /// Store over `storage`, creation times from `env`.
    pub fn new(storage: S, env: E) -> Self {
        Self { storage, env }
    }

    /// Store a new submission referencing the allocated `key_id`.
    ///
    /// # Errors
    ///
    /// `PersistenceFailure` on storage faults, or if `key_id` is unknown, not
    /// Allocated, or already referenced. Nothing is stored on error; the
    /// caller must release `key_id`.
    pub fn persist(
        &self,
        filename: &str,
        envelope: Envelope,
        wrapped_key: Vec<u8>,
        key_id: KeyId,
    ) -> Result<SubmissionId, SubmissionError> {
        let submission = NewSubmission {
            filename: filename.to_string(),
            envelope,
            wrapped_key,
            key_id,
            created_at: self.env.wall_clock_secs(),
        };

        let id = self.storage.insert_submission(&submission)?;
        tracing::debug!(submission_id = %id, %key_id, "persisted submission");
        Ok(id)
    }

    /// Fetch one submission.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids.
    pub fn fetch(&self, id: SubmissionId) -> Result<Submission, SubmissionError> {
        self.storage.load_submission(id)?.ok_or(SubmissionError::NotFound(id))
    }

    /// Listing of all submissions ordered by id, without ciphertext.
    pub fn list(&self) -> Result<Vec<SubmissionMetadata>, SubmissionError> {
        Ok(self.storage.list_submissions()?)
    }

    /// Delete a submission and return its key to the pool.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids.
    pub fn purge(&self, id: SubmissionId) -> Result<KeyId, SubmissionError> {
        let key_id = self.storage.purge_submission(id)?;
        tracing::info!(submission_id = %id, %key_id, "purged submission, key returned to pool");
        Ok(key_id)
    }

    /// Underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }
}

impl<S: Storage, E: Environment> SubmissionSource for SubmissionStore<S, E> {
    type Error = SubmissionError;

    fn fetch_submission(&self, id: SubmissionId) -> Result<Option<Submission>, Self::Error> {
        Ok(self.storage.load_submission(id)?)
    }
}
