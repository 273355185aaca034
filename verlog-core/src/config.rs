//! History engine configuration
//!
//! Stored as JSON. Missing files and missing fields fall back to defaults,
//! so an empty `{}` is a valid configuration (in-memory store, no compression).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::changeset::{ChangesetCodec, Compression};

/// Where version rows are kept
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process memory; history is lost on exit
    #[default]
    Memory,
    /// SQLite database file
    Sqlite { path: PathBuf },
}

/// Configuration for [`crate::History::open`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub store: StoreBackend,
    /// Compression for newly written changesets
    pub compression: Compression,
    pub zstd_level: i32,
    /// Largest encoded changeset the store accepts
    pub max_changeset_bytes: Option<usize>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::Memory,
            compression: Compression::None,
            zstd_level: 3,
            max_changeset_bytes: None,
        }
    }
}

impl HistoryConfig {
    /// Load configuration from a JSON file, or defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read history config from {:?}", path))?;
        let config: HistoryConfig = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse history config {:?}", path))?;
        Ok(config)
    }

    /// Save configuration, replacing the file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)
            .with_context(|| format!("Failed to write history config to {:?}", tmp_path))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to replace history config {:?}", path))?;
        Ok(())
    }

    /// Codec matching this configuration
    pub fn codec(&self) -> ChangesetCodec {
        ChangesetCodec::new(self.compression)
            .with_zstd_level(self.zstd_level)
            .with_max_encoded_bytes(self.max_changeset_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HistoryConfig::load(&dir.path().join("history.json")).unwrap();
        assert_eq!(config, HistoryConfig::default());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, r#"{"compression": "zstd"}"#).unwrap();

        let config = HistoryConfig::load(&path).unwrap();
        assert_eq!(config.compression, Compression::Zstd);
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.zstd_level, 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let config = HistoryConfig {
            store: StoreBackend::Sqlite {
                path: dir.path().join("versions.sqlite"),
            },
            compression: Compression::Zstd,
            zstd_level: 9,
            max_changeset_bytes: Some(1 << 20),
        };

        config.save(&path).unwrap();
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(HistoryConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_save_reports_failed_replace() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory cannot be replaced by a file
        let path = dir.path().join("history.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "x").unwrap();

        let err = HistoryConfig::default().save(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to replace history config"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "{ not json").unwrap();

        let err = HistoryConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse history config"));
    }

    #[test]
    fn test_codec_follows_config() {
        let config = HistoryConfig {
            compression: Compression::Zstd,
            ..Default::default()
        };
        assert_eq!(config.codec().compression(), Compression::Zstd);
    }
}
