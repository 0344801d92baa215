//! In-memory repository with content-addressed change ids.
//!
//! Keeps the same history semantics as the git backend (one file per change,
//! tip deduplication, first-record detection) without touching the disk.
//! Used by tests and dry runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::codec;
use crate::error::{StorageError, StorageResult};
use crate::record::{Record, SavedRecord};
use crate::repository::{ChangeUnit, ChangedFile, Repository};
use crate::SNAPSHOT_ID_MARKER;

#[derive(Default)]
struct History {
    initialized: bool,
    changes: Vec<ChangeUnit>,
}

pub struct MemoryRepository {
    snapshot_identifier_template: String,
    history: Mutex<History>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::with_template(SNAPSHOT_ID_MARKER)
    }

    pub fn with_template(snapshot_identifier_template: &str) -> Self {
        Self {
            snapshot_identifier_template: snapshot_identifier_template.to_string(),
            history: Mutex::new(History::default()),
        }
    }

    /// Raw change-units, oldest first
    pub fn changes(&self) -> Vec<ChangeUnit> {
        self.history.lock().changes.clone()
    }

    /// Append a change-unit as-is, bypassing the codec. Lets tests simulate
    /// history written by other tools.
    pub fn append_raw(&self, change: ChangeUnit) {
        self.history.lock().changes.push(change);
    }

    fn change_id(parent: Option<&str>, path: &str, message: &str, content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(parent.unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(message.as_bytes());
        hasher.update([0u8]);
        hasher.update(content);
        let mut id = format!("{:x}", hasher.finalize());
        id.truncate(40);
        id
    }

    fn checked(history: &History) -> StorageResult<()> {
        if history.initialized {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }
}

/// Newest change storing `(service, terms type, document)` at any extension.
fn latest_change<'a>(
    changes: &'a [ChangeUnit],
    service_id: &str,
    terms_type: &str,
    document_id: Option<&str>,
) -> Option<&'a ChangeUnit> {
    changes.iter().rev().find(|change| {
        change
            .files
            .iter()
            .any(|file| codec::path_matches(&file.path, service_id, terms_type, document_id))
    })
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn initialize(&self) -> StorageResult<()> {
        self.history.lock().initialized = true;
        Ok(())
    }

    async fn finalize(&self) -> StorageResult<()> {
        self.history.lock().initialized = false;
        Ok(())
    }

    async fn save(&self, mut record: Record) -> StorageResult<Option<SavedRecord>> {
        let mut history = self.history.lock();
        Self::checked(&history)?;

        let path = codec::generate_file_path(
            &record.service_id,
            &record.terms_type,
            record.document_id.as_deref(),
            Some(&record.mime_type),
        );
        let latest = latest_change(
            &history.changes,
            &record.service_id,
            &record.terms_type,
            record.document_id.as_deref(),
        );
        if let Some(change) = latest {
            let unchanged = change
                .files
                .iter()
                .any(|file| file.path == path && file.content == record.content);
            if unchanged {
                return Ok(None);
            }
        }
        record.is_first_record = latest.is_none();

        let encoded = codec::to_persistence(&record, &self.snapshot_identifier_template);
        let parent = history.changes.last().map(|change| change.id.as_str());
        let id = Self::change_id(parent, &encoded.file_path, &encoded.message, &encoded.content);

        tracing::debug!(
            record_id = %id,
            path = %encoded.file_path,
            first = record.is_first_record,
            "appending change"
        );

        history.changes.push(ChangeUnit {
            id: id.clone(),
            message: encoded.message,
            date: record.fetch_date,
            files: vec![ChangedFile {
                path: encoded.file_path,
                content: encoded.content,
            }],
        });

        Ok(Some(SavedRecord {
            id,
            is_first_record: record.is_first_record,
        }))
    }

    async fn find_latest(
        &self,
        service_id: &str,
        terms_type: &str,
        document_id: Option<&str>,
    ) -> StorageResult<Option<Record>> {
        let history = self.history.lock();
        Self::checked(&history)?;

        latest_change(&history.changes, service_id, terms_type, document_id)
            .map(codec::to_domain)
            .transpose()
    }

    async fn find_by_id(&self, id: &str) -> StorageResult<Option<Record>> {
        let history = self.history.lock();
        Self::checked(&history)?;

        history
            .changes
            .iter()
            .find(|change| change.id == id)
            .map(codec::to_domain)
            .transpose()
    }

    async fn find_all(&self) -> StorageResult<Vec<Record>> {
        let history = self.history.lock();
        Self::checked(&history)?;
        history.changes.iter().map(codec::to_domain).collect()
    }

    async fn count(&self) -> StorageResult<usize> {
        let history = self.history.lock();
        Self::checked(&history)?;
        Ok(history.changes.len())
    }

    async fn remove_all(&self) -> StorageResult<()> {
        self.history.lock().changes.clear();
        Ok(())
    }
}
