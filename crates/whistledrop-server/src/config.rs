//! Server configuration (loaded from `whistledrop.toml`).
//!
//! Every field has a default, so an empty or partial file is valid. CLI
//! flags override whatever the file sets.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use whistledrop_crypto::{DEFAULT_MODULUS_BITS, MIN_MODULUS_BITS};

use crate::intake::IntakeConfig;

/// Errors loading a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Config file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid TOML or has mistyped fields
    #[error("invalid config {path}: {source}")]
    Parse {
        /// Config file
        path: PathBuf,
        /// Parser error
        source: toml::de::Error,
    },

    /// Values parse but cannot be used
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Server and admin tool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// redb database file
    pub db_path: PathBuf,
    /// Modulus size for provisioned recipient keys
    pub modulus_bits: usize,
    /// Accepted upload extensions, lowercase; empty accepts any
    pub allowed_extensions: Vec<String>,
    /// Largest accepted upload in bytes
    pub max_upload_bytes: usize,
    /// Available-key count at which `status` starts warning
    pub low_key_watermark: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let intake = IntakeConfig::default();
        Self {
            db_path: PathBuf::from("whistledrop.redb"),
            modulus_bits: DEFAULT_MODULUS_BITS,
            allowed_extensions: intake.allowed_extensions,
            max_upload_bytes: intake.max_upload_bytes,
            low_key_watermark: 5,
        }
    }
}

impl ServerConfig {
    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Self = toml::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modulus_bits < MIN_MODULUS_BITS {
            return Err(ConfigError::Invalid(format!(
                "modulus_bits {} is below the minimum of {MIN_MODULUS_BITS}",
                self.modulus_bits
            )));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("max_upload_bytes must be positive".to_string()));
        }
        Ok(())
    }

    /// Upload rules for [`Intake`](crate::Intake). Extensions are
    /// normalized to lowercase without a leading dot.
    pub fn intake_config(&self) -> IntakeConfig {
        IntakeConfig {
            allowed_extensions: self
                .allowed_extensions
                .iter()
                .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.modulus_bits, 2048);
        assert_eq!(config.max_upload_bytes, 64 * 1024 * 1024);
        assert_eq!(config.allowed_extensions, ["pdf", "txt", "docx"]);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            db_path = "/var/lib/whistledrop/pool.redb"
            allowed_extensions = [".PDF", "odt"]
            "#,
        )
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/var/lib/whistledrop/pool.redb"));
        assert_eq!(config.low_key_watermark, 5);
        assert_eq!(config.intake_config().allowed_extensions, ["pdf", "odt"]);
    }

    #[test]
    fn load_rejects_small_modulus() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "modulus_bits = 512").unwrap();

        let err = ServerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_upload_bytes = \"lots\"").unwrap();

        let err = ServerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == file.path()));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
