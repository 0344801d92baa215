//! Archivist Versioned Record Store
//!
//! Persists fetched documents (snapshots) and the normalized content derived
//! from them (versions) as two append-only, auditable histories:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      VERSIONED RECORD STORE                         │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌──────────┐     ┌───────────────┐     ┌──────────────────────┐    │
//! │  │ Archivist│────►│               │────►│ snapshots repository │    │
//! │  │ pipeline │     │   Recorder    │     │  (git history)       │    │
//! │  └──────────┘     │               │     └──────────────────────┘    │
//! │                   │               │     ┌──────────────────────┐    │
//! │                   │               │────►│ versions repository  │    │
//! │                   └───────────────┘     │  (git history)       │    │
//! │                          │              └──────────────────────┘    │
//! │                          ▼                                          │
//! │                   ┌─────────────┐                                   │
//! │                   │ Record Codec│  Record ⇄ commit (message + file) │
//! │                   └─────────────┘                                   │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Content addressed**: record ids are commit ids
//! - **Deduplicated**: saving content identical to the tip is a no-op
//! - **Self-describing history**: record kind, lineage and location survive
//!   in the commit message and file path, so history can be decoded without
//!   any side index
//! - **Serialized writes**: each repository applies saves one at a time

pub mod codec;
pub mod error;
pub mod mime;
pub mod record;
pub mod recorder;
pub mod repository;


use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use codec::{ChangeKind, MessageTag};
pub use error::{StorageError, StorageResult};
pub use record::{Record, RecordId, SavedRecord};
pub use recorder::{Recorder, SnapshotParams, VersionParams};
pub use repository::git::GitRepository;
pub use repository::memory::MemoryRepository;
pub use repository::{ChangeUnit, ChangedFile, Repository};

// ============================================================================
// Storage Configuration
// ============================================================================

/// Placeholder substituted with a snapshot id in provenance lines.
pub const SNAPSHOT_ID_MARKER: &str = "%SNAPSHOT_ID";

/// Configuration for one repository (snapshots or versions)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Working tree of the git repository
    pub path: PathBuf,
    /// How a snapshot id is rendered in a version's provenance block.
    /// Every occurrence of `%SNAPSHOT_ID` is replaced by the id.
    pub snapshot_identifier_template: String,
    /// Commit author name
    pub author_name: String,
    /// Commit author email
    pub author_email: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/versions"),
            snapshot_identifier_template: SNAPSHOT_ID_MARKER.to_string(),
            author_name: "Archivist".to_string(),
            author_email: "bot@archivist.local".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Configuration for both repositories behind a [`Recorder`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub snapshots: StorageConfig,
    pub versions: StorageConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            snapshots: StorageConfig::at("./data/snapshots"),
            versions: StorageConfig::at("./data/versions"),
        }
    }
}

// ============================================================================
// Convenience Functions
// ============================================================================

/// Open a git-backed recorder from configuration
pub fn open_recorder(config: &RecorderConfig) -> Recorder {
    let snapshots = GitRepository::new(config.snapshots.clone());
    let versions = GitRepository::new(config.versions.clone());
    Recorder::new(std::sync::Arc::new(snapshots), std::sync::Arc::new(versions))
}
