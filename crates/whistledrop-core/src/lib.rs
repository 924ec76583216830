//! WhistleDrop Core
//!
//! Domain types shared by the server and the recipient tooling, plus the
//! seams that keep both sides testable.
//!
//! # Components
//!
//! - [`KeyId`], [`SubmissionId`]: stable identifiers assigned by storage
//! - [`Submission`], [`SubmissionMetadata`], [`PoolStatus`]: wire types,
//!   camelCase JSON with base64 byte fields
//! - [`Environment`]: wall clock and randomness, swapped for a seeded
//!   simulation in tests
//! - [`Keystore`]: the recipient's `{"<key id>": "<PEM>"}` private key file
//! - [`SubmissionSource`]: where retrieval fetches submissions from

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod keystore;
pub mod source;
pub mod types;

pub use env::{EnvRng, Environment};
pub use keystore::{Keystore, KeystoreError};
pub use source::SubmissionSource;
pub use types::{KeyId, PoolStatus, Submission, SubmissionId, SubmissionMetadata};
