//! The unit of persisted history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned by the store at save time (a commit id)
pub type RecordId = String;

/// A snapshot or a version.
///
/// Snapshots hold raw fetched content and have no `snapshot_ids`; versions
/// hold normalized content and reference the snapshots they were extracted
/// from. Records are built for a single save or decode and never mutated
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Assigned by the store; `None` before the record is saved
    pub id: Option<RecordId>,
    pub service_id: String,
    pub terms_type: String,
    /// Only set for terms spanning several documents
    pub document_id: Option<String>,
    pub mime_type: String,
    pub fetch_date: DateTime<Utc>,
    pub content: Vec<u8>,
    /// No prior record exists for `(service_id, terms_type, document_id)`
    pub is_first_record: bool,
    /// Produced by re-running extraction without a new fetch
    pub is_extract_only: bool,
    /// Snapshots a version was derived from, one per source document
    pub snapshot_ids: Vec<RecordId>,
}

impl Record {
    pub fn new(
        service_id: impl Into<String>,
        terms_type: impl Into<String>,
        mime_type: impl Into<String>,
        fetch_date: DateTime<Utc>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: None,
            service_id: service_id.into(),
            terms_type: terms_type.into(),
            document_id: None,
            mime_type: mime_type.into(),
            fetch_date,
            content: content.into(),
            is_first_record: false,
            is_extract_only: false,
            snapshot_ids: Vec::new(),
        }
    }

    pub fn with_document_id(mut self, document_id: Option<String>) -> Self {
        self.document_id = document_id;
        self
    }

    pub fn with_snapshot_ids(mut self, snapshot_ids: Vec<RecordId>) -> Self {
        self.snapshot_ids = snapshot_ids;
        self
    }

    pub fn extract_only(mut self, is_extract_only: bool) -> Self {
        self.is_extract_only = is_extract_only;
        self
    }

    /// Legacy name of [`Record::is_extract_only`].
    pub fn is_refilter(&self) -> bool {
        self.is_extract_only
    }

    /// Content as text, replacing invalid UTF-8 sequences.
    pub fn content_text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// Result of a save that appended a change-unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRecord {
    pub id: RecordId,
    pub is_first_record: bool,
}
