//! Archivist: tracking pipeline for externally hosted documents
//!
//! Fetches the documents of every declared terms, records raw snapshots,
//! extracts normalized content and records it as versions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                           TRACKING PIPELINE                              │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  ┌──────────────┐   for_each_terms   ┌────────────────┐                  │
//! │  │ Declarations │───────────────────►│ Tracking Queue │ (1 or N workers) │
//! │  └──────────────┘                    └───────┬────────┘                  │
//! │                                              │ one run per terms         │
//! │                                              ▼                           │
//! │  ┌─────────┐  fetch   ┌───────────┐  snapshots   ┌──────────┐           │
//! │  │ Fetcher │◄────────►│ Pipeline  │─────────────►│          │           │
//! │  └─────────┘          │           │  versions    │ Recorder │           │
//! │  ┌───────────┐extract │           │─────────────►│          │           │
//! │  │ Extractor │◄──────►│           │              └──────────┘           │
//! │  └───────────┘        └─────┬─────┘                                      │
//! │                             │ events                                     │
//! │                             ▼                                            │
//! │                       ┌──────────┐                                       │
//! │                       │ EventBus │──► listeners                          │
//! │                       └──────────┘                                       │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure policy
//! - Inaccessible documents are aggregated per terms and reported through
//!   an `inaccessibleContent` event; the batch goes on
//! - A known third-party quota error is ignored
//! - Anything else stops the batch, releases the fetcher, finalizes the
//!   recorder, and is returned to the caller

pub mod archivist;
pub mod collaborators;
pub mod error;
pub mod events;
pub mod queue;
pub mod terms;


use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use archivist::{
    Archivist, ArchivistContext, TermsOutcome, TrackOptions, TrackReport, DOCUMENT_SEPARATOR,
    VERSION_MIME_TYPE,
};
pub use collaborators::{ExtractRequest, Extractor, FetchRequest, FetchedContent, Fetcher};
pub use error::{
    ArchivistError, ArchivistResult, DeclarationError, ExtractError, FetchError, Severity,
};
pub use events::{ArchivistEvent, ErrorEvent, EventBus, Listener, RecordEvent, TrackingEvent};
pub use queue::{QueueControl, TrackingQueue};
pub use terms::{for_each_terms, Declarations, Service, SourceDocument, Terms};

// ============================================================================
// Configuration
// ============================================================================

/// Substring identifying a third-party quota error that is not worth
/// reporting.
pub const DEFAULT_QUOTA_ERROR_MARKER: &str = "HttpError: API rate limit exceeded for user ID";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivistConfig {
    /// Terms run at once when the batch fetches documents
    pub live_concurrency: usize,
    /// Terms run at once when the batch only re-extracts
    pub extract_only_concurrency: usize,
    /// Items buffered in the tracking queue
    pub queue_capacity: usize,
    /// Bound on the graceful shutdown after a fatal error
    pub shutdown_timeout_secs: u64,
    /// Errors whose message contains this are ignored; empty disables
    pub quota_error_marker: String,
}

impl Default for ArchivistConfig {
    fn default() -> Self {
        Self {
            live_concurrency: 1,
            extract_only_concurrency: 10,
            queue_capacity: 256,
            shutdown_timeout_secs: 60,
            quota_error_marker: DEFAULT_QUOTA_ERROR_MARKER.to_string(),
        }
    }
}

impl ArchivistConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
