//! Configuration for the checkpoint store
//!
//! A [`CheckpointConfig`] decides where checkpoint files live, how they are
//! compressed and whether the integrity hash is checked when loading.

use crate::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default directory for checkpoints when none is configured
pub const DEFAULT_BASE_DIR: &str = "./checkpoints";

/// Compression applied to checkpoint files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionKind {
    Gzip,
    None,
}

/// Configuration for a local checkpoint store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding one sub-directory per checkpoint id
    pub base_dir: PathBuf,
    /// Compression algorithm for new checkpoints
    pub compression: CompressionKind,
    /// Gzip level (0-9), ignored without compression
    #[serde(default = "default_level")]
    pub compression_level: u32,
    /// Verify the SHA-256 content hash on every load
    #[serde(default = "default_verify")]
    pub verify_on_load: bool,
}

fn default_level() -> u32 {
    6
}

fn default_verify() -> bool {
    true
}

impl CheckpointConfig {
    /// Local gzip-compressed checkpoints under [`DEFAULT_BASE_DIR`]
    pub fn default_local() -> Self {
        CheckpointConfig {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            compression: CompressionKind::Gzip,
            compression_level: default_level(),
            verify_on_load: true,
        }
    }

    /// Local checkpoints under the given directory
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        CheckpointConfig {
            base_dir: base_dir.as_ref().to_path_buf(),
            ..Self::default_local()
        }
    }

    pub fn with_compression(mut self, compression: CompressionKind) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Parse a storage URI
    ///
    /// Supports `file:///abs/path`, `file://relative/path` and plain paths.
    /// Other schemes are rejected.
    pub fn from_uri(uri: &str) -> Result<Self> {
        if uri.is_empty() {
            return Err(CheckpointError::validation("Empty checkpoint URI"));
        }
        if let Some(path) = uri.strip_prefix("file://") {
            if path.is_empty() {
                return Err(CheckpointError::validation("Invalid file URI: missing path"));
            }
            return Ok(Self::with_base_dir(path));
        }
        if let Some((scheme, _)) = uri.split_once("://") {
            return Err(CheckpointError::validation(format!(
                "Unsupported checkpoint URI scheme: {scheme}"
            )));
        }
        Ok(Self::with_base_dir(uri))
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let config: CheckpointConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(CheckpointError::validation("base_dir cannot be empty"));
        }
        if self.compression_level > 9 {
            return Err(CheckpointError::validation(format!(
                "compression_level must be between 0 and 9, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self::default_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_local_config() {
        let config = CheckpointConfig::default_local();
        assert_eq!(config.base_dir, PathBuf::from(DEFAULT_BASE_DIR));
        assert_eq!(config.compression, CompressionKind::Gzip);
        assert!(config.verify_on_load);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_uri_file_scheme() {
        let config = CheckpointConfig::from_uri("file:///var/sim/checkpoints").unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/var/sim/checkpoints"));
    }

    #[test]
    fn test_from_uri_plain_path() {
        let config = CheckpointConfig::from_uri("./runs/ckpt").unwrap();
        assert_eq!(config.base_dir, PathBuf::from("./runs/ckpt"));
    }

    #[test]
    fn test_from_uri_rejects_other_schemes() {
        let result = CheckpointConfig::from_uri("s3://bucket/key");
        assert!(result.unwrap_err().to_string().contains("Unsupported"));

        assert!(CheckpointConfig::from_uri("file://").is_err());
        assert!(CheckpointConfig::from_uri("").is_err());
    }

    #[test]
    fn test_validate_compression_level() {
        let config = CheckpointConfig::default_local().with_compression_level(12);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_file_applies_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, r#"{"base_dir": "/tmp/ckpt", "compression": "none"}"#).unwrap();

        let config = CheckpointConfig::from_json_file(&path).unwrap();
        assert_eq!(config.compression, CompressionKind::None);
        assert_eq!(config.compression_level, 6);
        assert!(config.verify_on_load);
    }
}
