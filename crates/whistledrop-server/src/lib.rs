//! WhistleDrop server side.
//!
//! Owns the recipient key pool and the submission store, and runs the upload
//! flow that ties them together. The server never holds a private key: it
//! encrypts each upload under a fresh symmetric key and wraps that key for a
//! recipient key allocated exclusively to the upload.
//!
//! # Components
//!
//! - [`KeyPool`]: single-use recipient keys with atomic allocation and
//!   compensating release
//! - [`SubmissionStore`]: persisted envelopes, one per allocated key
//! - [`Intake`]: validate, allocate, encrypt, wrap, persist
//! - [`storage`]: backends ([`MemoryStorage`], [`RedbStorage`]) and the
//!   fault-injecting [`ChaoticStorage`]
//! - [`SystemEnv`]: production environment (system clock, OS RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod intake;
mod key_pool;
pub mod storage;
mod submission_store;
mod system_env;
#[cfg(test)]
mod test_env;

pub use config::{ConfigError, ServerConfig};
pub use error::{IntakeError, PoolError, SubmissionError};
pub use intake::{Intake, IntakeConfig, Receipt};
pub use key_pool::{AllocationGuard, ImportReport, KeyPool};
pub use storage::{
    ChaosScope, ChaoticStorage, KeyRecord, KeyState, MemoryStorage, NewSubmission, RedbStorage,
    Storage, StorageError,
};
pub use submission_store::SubmissionStore;
pub use system_env::SystemEnv;
