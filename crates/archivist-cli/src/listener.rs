//! Event feed → log lines, plus a per-run tally printed when `track` ends.

use std::sync::atomic::{AtomicUsize, Ordering};

use archivist_core::{ArchivistEvent, ErrorEvent, Listener, RecordEvent, TrackingEvent};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub snapshots_recorded: usize,
    pub versions_recorded: usize,
    pub unchanged: usize,
    pub inaccessible: usize,
}

#[derive(Default)]
pub struct LoggingListener {
    snapshots_recorded: AtomicUsize,
    versions_recorded: AtomicUsize,
    unchanged: AtomicUsize,
    inaccessible: AtomicUsize,
}

impl LoggingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            snapshots_recorded: self.snapshots_recorded.load(Ordering::Relaxed),
            versions_recorded: self.versions_recorded.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            inaccessible: self.inaccessible.load(Ordering::Relaxed),
        }
    }

    fn log_record(&self, name: &str, event: &RecordEvent) {
        tracing::info!(
            event = name,
            service_id = %event.service_id,
            terms_type = %event.terms_type,
            document_id = event.document_id.as_deref().unwrap_or(""),
            record_id = event.record_id.as_deref().unwrap_or(""),
            "{name}"
        );
    }

    fn log_tracking(&self, name: &str, event: &TrackingEvent) {
        tracing::info!(
            event = name,
            run_id = %event.run_id,
            services = event.services,
            terms = event.terms,
            extract_only = event.extract_only,
            "{name}"
        );
    }
}

impl Listener for LoggingListener {
    fn on_event(&self, event: &ArchivistEvent) {
        let name = event.name();
        match event {
            ArchivistEvent::SnapshotRecorded(e) | ArchivistEvent::FirstSnapshotRecorded(e) => {
                self.snapshots_recorded.fetch_add(1, Ordering::Relaxed);
                self.log_record(name, e);
            }
            ArchivistEvent::VersionRecorded(e) | ArchivistEvent::FirstVersionRecorded(e) => {
                self.versions_recorded.fetch_add(1, Ordering::Relaxed);
                self.log_record(name, e);
            }
            ArchivistEvent::SnapshotNotChanged(e) | ArchivistEvent::VersionNotChanged(e) => {
                self.unchanged.fetch_add(1, Ordering::Relaxed);
                self.log_record(name, e);
            }
            ArchivistEvent::TrackingStarted(e) | ArchivistEvent::TrackingCompleted(e) => {
                self.log_tracking(name, e);
            }
            ArchivistEvent::InaccessibleContent(ErrorEvent {
                service_id,
                terms_type,
                message,
            }) => {
                self.inaccessible.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(event = name, %service_id, %terms_type, %message, "{name}");
            }
            ArchivistEvent::Error(ErrorEvent {
                service_id,
                terms_type,
                message,
            }) => {
                tracing::error!(event = name, %service_id, %terms_type, %message, "{name}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(record_id: Option<&str>) -> RecordEvent {
        RecordEvent {
            service_id: "Foo".to_string(),
            terms_type: "Terms of Service".to_string(),
            document_id: None,
            record_id: record_id.map(str::to_string),
        }
    }

    #[test]
    fn test_summary_counts_events() {
        let listener = LoggingListener::new();
        listener.on_event(&ArchivistEvent::FirstSnapshotRecorded(record(Some("a1"))));
        listener.on_event(&ArchivistEvent::VersionRecorded(record(Some("b2"))));
        listener.on_event(&ArchivistEvent::VersionNotChanged(record(None)));
        listener.on_event(&ArchivistEvent::InaccessibleContent(ErrorEvent {
            service_id: "Foo".to_string(),
            terms_type: "Terms of Service".to_string(),
            message: "Received HTTP code 404".to_string(),
        }));

        assert_eq!(
            listener.summary(),
            RunSummary {
                snapshots_recorded: 1,
                versions_recorded: 1,
                unchanged: 1,
                inaccessible: 1,
            }
        );
    }
}
