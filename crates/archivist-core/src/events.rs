//! Events emitted during tracking, and the listener interface observing them
//!
//! A [`Listener`] overrides the `on_*` methods for the events it cares
//! about; the others default to no-ops. Emission is synchronous fan-out: a
//! panicking listener is logged and skipped, never preventing the remaining
//! listeners from observing the event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use archivist_storage::RecordId;
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

/// A snapshot or version save outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordEvent {
    pub service_id: String,
    pub terms_type: String,
    pub document_id: Option<String>,
    /// `None` when the content was unchanged
    pub record_id: Option<RecordId>,
}

/// Batch boundaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackingEvent {
    pub run_id: Uuid,
    pub services: usize,
    pub terms: usize,
    pub extract_only: bool,
}

/// A failed terms run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    pub service_id: String,
    pub terms_type: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ArchivistEvent {
    SnapshotRecorded(RecordEvent),
    FirstSnapshotRecorded(RecordEvent),
    SnapshotNotChanged(RecordEvent),
    VersionRecorded(RecordEvent),
    FirstVersionRecorded(RecordEvent),
    VersionNotChanged(RecordEvent),
    TrackingStarted(TrackingEvent),
    TrackingCompleted(TrackingEvent),
    InaccessibleContent(ErrorEvent),
    Error(ErrorEvent),
}

impl ArchivistEvent {
    /// Event kind, as named on the event feed
    pub fn name(&self) -> &'static str {
        match self {
            ArchivistEvent::SnapshotRecorded(_) => "snapshotRecorded",
            ArchivistEvent::FirstSnapshotRecorded(_) => "firstSnapshotRecorded",
            ArchivistEvent::SnapshotNotChanged(_) => "snapshotNotChanged",
            ArchivistEvent::VersionRecorded(_) => "versionRecorded",
            ArchivistEvent::FirstVersionRecorded(_) => "firstVersionRecorded",
            ArchivistEvent::VersionNotChanged(_) => "versionNotChanged",
            ArchivistEvent::TrackingStarted(_) => "trackingStarted",
            ArchivistEvent::TrackingCompleted(_) => "trackingCompleted",
            ArchivistEvent::InaccessibleContent(_) => "inaccessibleContent",
            ArchivistEvent::Error(_) => "error",
        }
    }

    /// Snapshot event for a save outcome
    pub(crate) fn snapshot(record: RecordEvent, is_first_record: bool) -> Self {
        match (&record.record_id, is_first_record) {
            (None, _) => ArchivistEvent::SnapshotNotChanged(record),
            (Some(_), true) => ArchivistEvent::FirstSnapshotRecorded(record),
            (Some(_), false) => ArchivistEvent::SnapshotRecorded(record),
        }
    }

    /// Version event for a save outcome
    pub(crate) fn version(record: RecordEvent, is_first_record: bool) -> Self {
        match (&record.record_id, is_first_record) {
            (None, _) => ArchivistEvent::VersionNotChanged(record),
            (Some(_), true) => ArchivistEvent::FirstVersionRecorded(record),
            (Some(_), false) => ArchivistEvent::VersionRecorded(record),
        }
    }
}

// ============================================================================
// Listener
// ============================================================================

pub trait Listener: Send + Sync {
    fn on_snapshot_recorded(&self, _event: &RecordEvent) {}
    fn on_first_snapshot_recorded(&self, _event: &RecordEvent) {}
    fn on_snapshot_not_changed(&self, _event: &RecordEvent) {}
    fn on_version_recorded(&self, _event: &RecordEvent) {}
    fn on_first_version_recorded(&self, _event: &RecordEvent) {}
    fn on_version_not_changed(&self, _event: &RecordEvent) {}
    fn on_tracking_started(&self, _event: &TrackingEvent) {}
    fn on_tracking_completed(&self, _event: &TrackingEvent) {}
    fn on_inaccessible_content(&self, _event: &ErrorEvent) {}
    fn on_error(&self, _event: &ErrorEvent) {}

    /// Route an event to its `on_*` method
    fn on_event(&self, event: &ArchivistEvent) {
        match event {
            ArchivistEvent::SnapshotRecorded(e) => self.on_snapshot_recorded(e),
            ArchivistEvent::FirstSnapshotRecorded(e) => self.on_first_snapshot_recorded(e),
            ArchivistEvent::SnapshotNotChanged(e) => self.on_snapshot_not_changed(e),
            ArchivistEvent::VersionRecorded(e) => self.on_version_recorded(e),
            ArchivistEvent::FirstVersionRecorded(e) => self.on_first_version_recorded(e),
            ArchivistEvent::VersionNotChanged(e) => self.on_version_not_changed(e),
            ArchivistEvent::TrackingStarted(e) => self.on_tracking_started(e),
            ArchivistEvent::TrackingCompleted(e) => self.on_tracking_completed(e),
            ArchivistEvent::InaccessibleContent(e) => self.on_inaccessible_content(e),
            ArchivistEvent::Error(e) => self.on_error(e),
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, listener: Arc<dyn Listener>) {
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn emit(&self, event: ArchivistEvent) {
        // Snapshot the list so a listener may attach others while notified
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            let delivered = catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
            if delivered.is_err() {
                tracing::error!(event = event.name(), "listener panicked, skipping it");
            }
        }
    }
}
