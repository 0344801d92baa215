//! Repository: physical persistence of one logical collection
//!
//! A repository is an ordered, append-only history of change-units, each
//! writing exactly one file. Implementations must apply concurrent saves one
//! at a time, in submission order: the tip read to deduplicate a save must
//! never be invalidated by an interleaved write.

pub mod git;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageResult;
use crate::record::{Record, RecordId, SavedRecord};

/// One atomic, immutable entry of a repository history (a commit)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeUnit {
    pub id: RecordId,
    pub message: String,
    pub date: DateTime<Utc>,
    /// Files touched by the change. Well-formed history has exactly one.
    pub files: Vec<ChangedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    /// Logical, `/`-separated path
    pub path: String,
    pub content: Vec<u8>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Open (or create) the underlying store. Idempotent.
    async fn initialize(&self) -> StorageResult<()>;

    /// Flush and release the underlying store. Idempotent.
    async fn finalize(&self) -> StorageResult<()>;

    /// Append `record` unless its content equals the current tip at its path.
    ///
    /// Returns `None` when nothing was written. `is_first_record` on the input
    /// is ignored: the repository decides it from its own history.
    async fn save(&self, record: Record) -> StorageResult<Option<SavedRecord>>;

    /// Most recent record of `(service, terms type, document)`, whatever its
    /// mime type.
    async fn find_latest(
        &self,
        service_id: &str,
        terms_type: &str,
        document_id: Option<&str>,
    ) -> StorageResult<Option<Record>>;

    async fn find_by_id(&self, id: &str) -> StorageResult<Option<Record>>;

    /// Every record, oldest first
    async fn find_all(&self) -> StorageResult<Vec<Record>>;

    async fn count(&self) -> StorageResult<usize>;

    /// Erase the whole history
    async fn remove_all(&self) -> StorageResult<()>;
}
