//! Single-use recipient key pool.
//!
//! Every upload is wrapped for its own recipient key. The pool hands each key
//! to at most one upload and takes it back only when that upload failed to
//! persist (or an operator resets or purges it).
//!
//! # State Machine
//!
//! ```text
//!              allocate()
//! Available ──────────────► Allocated
//!     ▲                         │
//!     └─────────────────────────┘
//!       release() / reset() / purge
//! ```
//!
//! Allocation is the commit: there is no separate "mark used" step. A key
//! referenced by a live submission cannot be released or reset.

use std::path::Path;

use serde::Deserialize;
use whistledrop_core::{EnvRng, Environment, KeyId, PoolStatus};
use whistledrop_crypto::{RecipientPrivateKey, RecipientPublicKey, generate_key_pair};

use crate::{
    error::PoolError,
    storage::{KeyRecord, Storage, StorageError},
};

/// Attempts at a compensating release before the key is left Allocated.
const RELEASE_ATTEMPTS: u32 = 3;

/// Outcome of a bulk key import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Newly created records, in file order
    pub imported: Vec<KeyId>,
    /// Keys skipped because they were already in the pool
    pub duplicates: usize,
    /// Entries skipped because they did not parse as public keys
    pub invalid: usize,
}

/// Accepted layouts of a public key import file.
#[derive(Deserialize)]
#[serde(untagged)]
enum KeyFile {
    /// `{"public_keys": ["-----BEGIN PUBLIC KEY-----...", ...]}`
    Wrapped { public_keys: Vec<String> },
    /// `["-----BEGIN PUBLIC KEY-----...", ...]`
    List(Vec<String>),
    /// `"-----BEGIN PUBLIC KEY-----..."`
    Single(String),
}

impl KeyFile {
    fn into_pems(self) -> Vec<String> {
        match self {
            Self::Wrapped { public_keys } | Self::List(public_keys) => public_keys,
            Self::Single(pem) => vec![pem],
        }
    }
}

/// Split a bare PEM file into its `-----BEGIN ... -----END ...-----` blocks.
/// A block missing its END line runs to the next BEGIN.
fn pem_blocks(text: &str) -> Vec<&str> {
    const BEGIN: &str = "-----BEGIN";
    const END: &str = "-----END";

    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(BEGIN) {
        let block = &rest[start..];
        let next_begin = block[BEGIN.len()..].find(BEGIN).map_or(block.len(), |i| i + BEGIN.len());
        let end = block[..next_begin]
            .find(END)
            .and_then(|end| {
                let tail = end + END.len();
                block[tail..next_begin].find("-----").map(|close| tail + close + "-----".len())
            })
            .unwrap_or(next_begin);

        blocks.push(&block[..end]);
        rest = &block[end..];
    }
    blocks
}

/// Repository of recipient keys with exclusive allocation.
///
/// Cheap to clone; clones share storage.
#[derive(Clone)]
pub struct KeyPool<S: Storage, E: Environment> {
    storage: S,
    env: E,
    low_watermark: u64,
}

impl<S: Storage, E: Environment> KeyPool<S, E> {
    /// Pool over `storage`, timestamps and randomness from `env`.
    pub fn new(storage: S, env: E) -> Self {
        Self { storage, env, low_watermark: 0 }
    }

    /// Warn from [`KeyPool::status`] once available keys drop to `watermark`.
    #[must_use]
    pub fn with_low_watermark(mut self, watermark: u64) -> Self {
        self.low_watermark = watermark;
        self
    }

    /// Add a public key in the Available state.
    ///
    /// # Errors
    ///
    /// `DuplicateKey` if the same key (by canonical DER) is already stored.
    pub fn import_key(&self, public_key: &RecipientPublicKey) -> Result<KeyId, PoolError> {
        let der = public_key.to_der()?;

        match self.storage.insert_key(&der, self.env.wall_clock_secs()) {
            Ok(key_id) => {
                tracing::info!(%key_id, modulus_bits = public_key.modulus_len() * 8, "imported key");
                Ok(key_id)
            },
            Err(err) => {
                let err = PoolError::from(err);
                if let PoolError::DuplicateKey { existing } = &err {
                    tracing::warn!(%existing, "skipping duplicate key");
                }
                Err(err)
            },
        }
    }

    /// Parse a PEM public key and import it.
    ///
    /// # Errors
    ///
    /// `Crypto` if the text is not a public key, otherwise as
    /// [`KeyPool::import_key`].
    pub fn import_pem(&self, pem: &str) -> Result<KeyId, PoolError> {
        let public_key = RecipientPublicKey::from_pem(pem)?;
        self.import_key(&public_key)
    }

    /// Import every key in a key file.
    ///
    /// The file is JSON in one of three layouts (`{"public_keys": [...]}`, a
    /// list of PEM strings, or one PEM string) or a bare PEM file holding one
    /// or more keys. Duplicate and unparseable entries are skipped and
    /// counted.
    ///
    /// # Errors
    ///
    /// `ImportFile` if the file cannot be read or has no recognised layout;
    /// storage failures abort the import (keys already imported stay).
    pub fn import_file(&self, path: impl AsRef<Path>) -> Result<ImportReport, PoolError> {
        let path = path.as_ref();
        let import_err =
            |reason: String| PoolError::ImportFile { path: path.to_path_buf(), reason };

        let text = std::fs::read_to_string(path).map_err(|e| import_err(e.to_string()))?;

        let pems = match serde_json::from_str::<KeyFile>(&text) {
            Ok(file) => file.into_pems(),
            Err(_) if text.contains("-----BEGIN") => {
                pem_blocks(&text).into_iter().map(str::to_string).collect()
            },
            Err(e) => return Err(import_err(e.to_string())),
        };

        let mut report = ImportReport::default();
        for pem in pems {
            match self.import_pem(&pem) {
                Ok(key_id) => report.imported.push(key_id),
                Err(PoolError::DuplicateKey { .. }) => report.duplicates += 1,
                Err(PoolError::Crypto(err)) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unparseable key");
                    report.invalid += 1;
                },
                Err(err) => return Err(err),
            }
        }

        tracing::info!(
            path = %path.display(),
            imported = report.imported.len(),
            duplicates = report.duplicates,
            invalid = report.invalid,
            "key file imported"
        );
        Ok(report)
    }

    /// Generate `count` key pairs and import their public halves.
    ///
    /// Returns the private halves for the recipient's keystore. They are not
    /// retained anywhere on the server side.
    ///
    /// # Errors
    ///
    /// `Crypto` if generation fails (e.g. `bits` below the minimum).
    pub fn provision(
        &self,
        count: usize,
        bits: usize,
    ) -> Result<Vec<(KeyId, RecipientPrivateKey)>, PoolError> {
        let mut rng = EnvRng::new(&self.env);
        let mut provisioned = Vec::with_capacity(count);

        for _ in 0..count {
            let private_key = generate_key_pair(&mut rng, bits)?;
            let key_id = self.import_key(&private_key.public_key())?;
            provisioned.push((key_id, private_key));
        }

        Ok(provisioned)
    }

    /// Claim one Available key for an upload.
    ///
    /// Linearizable with every other `allocate` and `release`: no two
    /// callers receive the same key between releases.
    ///
    /// # Errors
    ///
    /// `NoAvailableKey` if the pool is exhausted.
    pub fn allocate(&self) -> Result<(KeyId, RecipientPublicKey), PoolError> {
        let Some((key_id, der)) = self.storage.allocate_key(self.env.wall_clock_secs())? else {
            tracing::warn!("key pool exhausted, rejecting upload");
            return Err(PoolError::NoAvailableKey);
        };

        let public_key = match RecipientPublicKey::from_der(&der) {
            Ok(public_key) => public_key,
            Err(err) => {
                tracing::error!(%key_id, error = %err, "stored public key is corrupt");
                self.release(key_id)?;
                return Err(err.into());
            },
        };

        tracing::debug!(%key_id, "allocated key");
        Ok((key_id, public_key))
    }

    /// [`KeyPool::allocate`], with the key released on drop unless the
    /// returned guard is committed.
    ///
    /// # Errors
    ///
    /// As [`KeyPool::allocate`].
    pub fn allocate_guarded(&self) -> Result<AllocationGuard<'_, S, E>, PoolError> {
        let (key_id, public_key) = self.allocate()?;
        Ok(AllocationGuard { pool: self, key_id, public_key, armed: true })
    }

    /// Compensating release after a failed upload.
    ///
    /// No-op for a key that is already Available.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids, `KeyInUse` if a submission references the
    /// key.
    pub fn release(&self, key_id: KeyId) -> Result<(), PoolError> {
        if self.storage.release_key(key_id)? {
            tracing::warn!(%key_id, "released key after failed upload");
        }
        Ok(())
    }

    /// Administrative release.
    ///
    /// # Errors
    ///
    /// As [`KeyPool::release`].
    pub fn reset(&self, key_id: KeyId) -> Result<(), PoolError> {
        if self.storage.release_key(key_id)? {
            tracing::warn!(%key_id, "key reset by operator");
        } else {
            tracing::info!(%key_id, "key already available");
        }
        Ok(())
    }

    /// Administrative release of every Allocated key no submission
    /// references, such as keys stranded by a crash mid-upload. Keys that
    /// become referenced or deleted while the sweep runs are skipped.
    ///
    /// Returns the ids that were reset.
    ///
    /// # Errors
    ///
    /// Storage failures abort the sweep (keys already reset stay reset).
    pub fn reset_all(&self) -> Result<Vec<KeyId>, PoolError> {
        let mut reset = Vec::new();
        for record in self.storage.list_keys()? {
            if record.state.is_available() {
                continue;
            }
            match self.storage.release_key(record.id) {
                Ok(true) => reset.push(record.id),
                Ok(false)
                | Err(StorageError::KeyInUse { .. } | StorageError::KeyNotFound(_)) => {},
                Err(err) => return Err(err.into()),
            }
        }

        tracing::warn!(count = reset.len(), "unreferenced allocated keys reset by operator");
        Ok(reset)
    }

    /// Remove a key record.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids, `KeyInUse` while referenced.
    pub fn delete(&self, key_id: KeyId) -> Result<(), PoolError> {
        self.storage.delete_key(key_id)?;
        tracing::info!(%key_id, "deleted key");
        Ok(())
    }

    /// Pool counters. Warns when the pool is empty or at the low watermark.
    pub fn status(&self) -> Result<PoolStatus, PoolError> {
        let status = self.storage.pool_status()?;

        if status.is_exhausted() {
            tracing::warn!(total = status.total_keys, "no keys available, uploads will be rejected");
        } else if status.available_keys <= self.low_watermark {
            tracing::warn!(available = status.available_keys, "key pool running low");
        }

        Ok(status)
    }

    /// All key records ordered by id.
    pub fn list(&self) -> Result<Vec<KeyRecord>, PoolError> {
        Ok(self.storage.list_keys()?)
    }

    /// Underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Environment used for timestamps and randomness.
    pub fn env(&self) -> &E {
        &self.env
    }
}

/// An allocated key that goes back to the pool unless committed.
///
/// Covers every exit between allocation and a successful persist: error
/// returns, early returns, and unwinding panics all release the key.
#[must_use = "dropping the guard releases the key immediately"]
pub struct AllocationGuard<'a, S: Storage, E: Environment> {
    pool: &'a KeyPool<S, E>,
    key_id: KeyId,
    public_key: RecipientPublicKey,
    armed: bool,
}

impl<S: Storage, E: Environment> AllocationGuard<'_, S, E> {
    /// Allocated key id.
    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    /// Public key to wrap the submission key for.
    pub fn public_key(&self) -> &RecipientPublicKey {
        &self.public_key
    }

    /// The submission referencing this key was persisted; keep it allocated.
    pub fn commit(mut self) {
        self.armed = false;
    }

    /// Release now rather than at drop.
    pub fn release(mut self) {
        self.armed = false;
        self.release_now();
    }

    /// Retries transient storage faults; anything else is final.
    fn release_now(&self) {
        let mut attempt = 1;
        loop {
            match self.pool.release(self.key_id) {
                Ok(()) => return,
                Err(err) if err.is_retryable() && attempt < RELEASE_ATTEMPTS => {
                    tracing::warn!(
                        key_id = %self.key_id,
                        attempt,
                        error = %err,
                        "compensating release failed, retrying"
                    );
                    attempt += 1;
                },
                Err(err) => {
                    tracing::error!(
                        key_id = %self.key_id,
                        attempts = attempt,
                        error = %err,
                        "compensating release failed, key stays allocated until reset"
                    );
                    return;
                },
            }
        }
    }
}

impl<S: Storage, E: Environment> Drop for AllocationGuard<'_, S, E> {
    fn drop(&mut self) {
        if self.armed {
            self.release_now();
        }
    }
}
