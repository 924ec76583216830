//! Upload orchestration.
//!
//! ```text
//! validate ─► allocate ─► generate key ─► encrypt ─► wrap ─► persist ─► commit
//!                 │                                              │
//!                 └──────────── release on any failure ◄─────────┘
//! ```
//!
//! Validation runs before allocation, so rejected uploads never touch the
//! pool. Between allocation and commit the key is held by an
//! [`AllocationGuard`](crate::AllocationGuard).

use whistledrop_core::{EnvRng, Environment, KeyId, SubmissionId};
use whistledrop_crypto::{encrypt, generate_key, wrap_key};

use crate::{
    error::IntakeError,
    key_pool::KeyPool,
    storage::Storage,
    submission_store::SubmissionStore,
};

/// Upload acceptance rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeConfig {
    /// Lowercase extensions accepted; empty accepts any file
    pub allowed_extensions: Vec<String>,
    /// Largest accepted upload in bytes
    pub max_upload_bytes: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: vec!["pdf".to_string(), "txt".to_string(), "docx".to_string()],
            max_upload_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Proof of a stored upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    /// Stored submission
    pub submission_id: SubmissionId,
    /// Recipient key the upload was wrapped for
    pub key_id: KeyId,
}

/// Accepts uploads: encrypts each one for a freshly allocated recipient key
/// and stores it.
#[derive(Clone)]
pub struct Intake<S: Storage, E: Environment> {
    pool: KeyPool<S, E>,
    store: SubmissionStore<S, E>,
    config: IntakeConfig,
}

impl<S: Storage, E: Environment> Intake<S, E> {
    /// Intake over a shared storage backend.
    pub fn new(storage: S, env: E, config: IntakeConfig) -> Self {
        Self {
            pool: KeyPool::new(storage.clone(), env.clone()),
            store: SubmissionStore::new(storage, env),
            config,
        }
    }

    /// Encrypt and store one upload.
    ///
    /// On success the allocated key stays Allocated and is referenced by the
    /// new submission. On any failure after allocation the key is released
    /// before the error is returned.
    ///
    /// # Errors
    ///
    /// - `MissingFilename`, `ExtensionNotAllowed`, `TooLarge`: rejected
    ///   before allocation
    /// - `Pool(NoAvailableKey)`: pool exhausted
    /// - `Crypto`: wrapping failed
    /// - `Persist`: storage refused the submission
    pub fn submit(&self, filename: &str, contents: &[u8]) -> Result<Receipt, IntakeError> {
        let filename = self.validate(filename, contents.len())?;

        let guard = self.pool.allocate_guarded()?;
        let key_id = guard.key_id();

        let mut rng = EnvRng::new(self.pool.env());
        let symmetric_key = generate_key(&mut rng);
        let envelope = encrypt(contents, &symmetric_key, &mut rng);
        let wrapped_key = wrap_key(&symmetric_key, guard.public_key(), &mut rng)?;
        drop(symmetric_key);

        match self.store.persist(&filename, envelope, wrapped_key, key_id) {
            Ok(submission_id) => {
                guard.commit();
                tracing::info!(%submission_id, %key_id, size = contents.len(), "accepted upload");
                Ok(Receipt { submission_id, key_id })
            },
            Err(err) => {
                tracing::error!(%key_id, error = %err, "persist failed, releasing key");
                guard.release();
                Err(err.into())
            },
        }
    }

    /// Key pool used for allocation.
    pub fn pool(&self) -> &KeyPool<S, E> {
        &self.pool
    }

    /// Submission store written to.
    pub fn store(&self) -> &SubmissionStore<S, E> {
        &self.store
    }

    /// Reduce `filename` to its final component and check the upload
    /// against the configured rules.
    fn validate(&self, filename: &str, size: usize) -> Result<String, IntakeError> {
        let name = filename.rsplit(['/', '\\']).next().unwrap_or_default().trim();
        if name.is_empty() || name == "." || name == ".." {
            return Err(IntakeError::MissingFilename);
        }

        if !self.config.allowed_extensions.is_empty() {
            let extension =
                name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).unwrap_or_default();
            if !self.config.allowed_extensions.iter().any(|allowed| *allowed == extension) {
                return Err(IntakeError::ExtensionNotAllowed { extension });
            }
        }

        if size > self.config.max_upload_bytes {
            return Err(IntakeError::TooLarge { size, max: self.config.max_upload_bytes });
        }

        Ok(name.to_string())
    }
}
