//! `config.json` for the `archivist` binary.
//!
//! Every section is optional; a missing file yields the defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use archivist_core::ArchivistConfig;
use archivist_storage::RecorderConfig;
use serde::{Deserialize, Serialize};

use crate::fetcher::FetcherConfig;
use crate::logging::LogConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recorder: RecorderConfig,
    pub archivist: ArchivistConfig,
    pub fetcher: FetcherConfig,
    /// Directory holding one `<serviceId>.json` declaration per service
    pub declarations_path: PathBuf,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recorder: RecorderConfig::default(),
            archivist: ArchivistConfig::default(),
            fetcher: FetcherConfig::default(),
            declarations_path: PathBuf::from("./declarations"),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Read the configuration at `path`, falling back to defaults when the
    /// file does not exist. A file that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.archivist, ArchivistConfig::default());
        assert_eq!(config.declarations_path, PathBuf::from("./declarations"));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "recorder": { "versions": { "path": "/srv/versions" } },
                "archivist": { "extract_only_concurrency": 4 },
                "fetcher": { "timeout_secs": 5 }
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.recorder.versions.path, PathBuf::from("/srv/versions"));
        assert_eq!(config.recorder.versions.snapshot_identifier_template, "%SNAPSHOT_ID");
        assert_eq!(config.archivist.extract_only_concurrency, 4);
        assert_eq!(config.archivist.live_concurrency, 1);
        assert_eq!(config.fetcher.timeout_secs, 5);
        assert_eq!(config.fetcher.max_bytes, FetcherConfig::default().max_bytes);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
