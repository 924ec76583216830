//! Recipient-side retrieval.
//!
//! Fetches a submission, finds the private key for the key it was wrapped
//! for, unwraps the symmetric key and decrypts the envelope. Retrieval never
//! writes: the same submission can be opened any number of times.
//!
//! # Components
//!
//! - [`retrieve`]: fetch from a [`SubmissionSource`] and open
//! - [`open`]: open a submission already in hand (e.g. an exported record)
//! - [`RetrievalError`]: what can go wrong, integrity failures kept distinct
//!
//! With the `cli` feature (default) the crate also builds the
//! `whistledrop-journalist` tool over a local database file.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod retrieval;

pub use error::RetrievalError;
pub use retrieval::{open, retrieve};
pub use whistledrop_core::{Keystore, Submission, SubmissionId, SubmissionSource};
