//! Where retrieval reads submissions from.
//!
//! The recipient tooling talks to a database file today; the trait keeps
//! the retrieval logic independent of that.

use crate::types::{Submission, SubmissionId};

/// Read-only access to stored submissions.
///
/// Implementations must not mutate any state when fetching: retrieval is
/// repeatable.
pub trait SubmissionSource {
    /// Backend failure type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch one submission. `Ok(None)` if no such submission exists.
    fn fetch_submission(&self, id: SubmissionId) -> Result<Option<Submission>, Self::Error>;
}

impl<T: SubmissionSource + ?Sized> SubmissionSource for &T {
    type Error = T::Error;

    fn fetch_submission(&self, id: SubmissionId) -> Result<Option<Submission>, Self::Error> {
        (**self).fetch_submission(id)
    }
}
