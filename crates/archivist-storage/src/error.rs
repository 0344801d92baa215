//! Error types for the record store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// A required field is missing from a record to save.
    #[error("Invalid record: `{field}` is required")]
    Validation { field: &'static str },

    /// A version must reference at least one snapshot it was extracted from.
    #[error("Invalid record: a version must reference at least one snapshot id")]
    MissingSnapshotReference,

    /// A version references a snapshot id the snapshots store does not hold.
    #[error("Invalid record: snapshot `{id}` does not exist")]
    UnknownSnapshot { id: String },

    /// A version references a snapshot recorded for another terms.
    #[error("Invalid record: snapshot `{id}` belongs to {service_id} {terms_type}")]
    ForeignSnapshot {
        id: String,
        service_id: String,
        terms_type: String,
    },

    /// A change-unit touched more or fewer than one logical file.
    #[error(
        "Store integrity violation: commit {commit} touches {count} files ({paths})",
        count = .files.len(),
        paths = .files.join(", ")
    )]
    StoreIntegrity { commit: String, files: Vec<String> },

    /// A stored path does not follow the `service/terms type[ #document].ext` layout.
    #[error("Store integrity violation: unexpected record path `{0}`")]
    InvalidPath(String),

    #[error("Repository used before `initialize` or after `finalize`")]
    NotInitialized,

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Join(err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
