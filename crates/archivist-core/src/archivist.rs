//! Archivist: per-terms pipeline and batch scheduling
//!
//! ```text
//!  PENDING ──► FETCHING ──► SNAPSHOT_SAVING ──► SNAPSHOT_LOADING ──► EXTRACTING ──► VERSION_SAVING ──► DONE
//!     │                                               ▲      │
//!     └────────────────── extract only ───────────────┘      └──► SKIPPED (no snapshot yet)
//! ```
//!
//! Documents of one terms are fetched, and their snapshots extracted,
//! concurrently. Terms are scheduled on a [`TrackingQueue`] whose concurrency
//! depends on whether the batch performs live fetches.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use archivist_storage::{Record, RecordId, Recorder, SavedRecord, SnapshotParams, VersionParams};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use crate::collaborators::{ExtractRequest, Extractor, FetchRequest, Fetcher};
use crate::error::{ArchivistError, ArchivistResult, ExtractError, FetchError, Severity};
use crate::events::{ArchivistEvent, ErrorEvent, EventBus, Listener, RecordEvent, TrackingEvent};
use crate::queue::{ErrorHandler, JobFuture, Processor, QueueControl, TrackingQueue};
use crate::terms::{for_each_terms, Declarations, SourceDocument, Terms};
use crate::ArchivistConfig;

/// Mime type of every version
pub const VERSION_MIME_TYPE: &str = "text/markdown";

/// Joins the extracted contents of a multi-document terms
pub const DOCUMENT_SEPARATOR: &str = "\n\n";

/// Services the archivist is constructed with
pub struct ArchivistContext {
    pub recorder: Arc<Recorder>,
    pub fetcher: Arc<dyn Fetcher>,
    pub extractor: Arc<dyn Extractor>,
    pub declarations: Arc<Declarations>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackOptions {
    /// Every declared service when `None`
    pub services: Option<Vec<String>>,
    /// Every declared terms type when `None`
    pub terms_types: Option<Vec<String>>,
    /// Re-derive versions from the latest snapshots without fetching
    pub extract_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackReport {
    pub run_id: Uuid,
    pub services: usize,
    pub terms: usize,
    pub extract_only: bool,
}

/// How a terms run ended without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermsOutcome {
    /// No snapshot exists yet for any document of the terms
    Skipped,
    /// A version was derived; `None` when it equals the latest one
    Versioned(Option<SavedRecord>),
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Clone)]
struct Pipeline {
    recorder: Arc<Recorder>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    events: Arc<EventBus>,
}

impl Pipeline {
    async fn run(&self, terms: Terms, extract_only: bool) -> ArchivistResult<TermsOutcome> {
        let mut inaccessible = Vec::new();
        if !extract_only {
            inaccessible = self.fetch_and_record_snapshots(&terms).await?;
        }

        let snapshots = self.load_snapshots(&terms).await?;
        if snapshots.is_empty() {
            tracing::debug!("no snapshot recorded yet, skipping");
            return if inaccessible.is_empty() {
                Ok(TermsOutcome::Skipped)
            } else {
                Err(ArchivistError::InaccessibleContent(inaccessible))
            };
        }

        let version = match self.extract(&snapshots).await {
            Ok(content) => Some(
                self.record_version(&terms, &snapshots, content, extract_only)
                    .await?,
            ),
            Err(ArchivistError::InaccessibleContent(messages)) => {
                inaccessible.extend(messages);
                None
            }
            Err(err) => return Err(err),
        };

        if !inaccessible.is_empty() {
            return Err(ArchivistError::InaccessibleContent(inaccessible));
        }
        Ok(TermsOutcome::Versioned(version.flatten()))
    }

    /// Fetch every document concurrently, recording each snapshot as soon as
    /// its fetch completes. Returns soft failures in declaration order; a
    /// hard failure aborts the sibling fetches.
    async fn fetch_and_record_snapshots(&self, terms: &Terms) -> ArchivistResult<Vec<String>> {
        let mut fetches = JoinSet::new();
        for (index, document) in terms.documents.iter().enumerate() {
            let pipeline = self.clone();
            let record = RecordEvent {
                service_id: terms.service_id.clone(),
                terms_type: terms.terms_type.clone(),
                document_id: terms.document_id(document).map(str::to_string),
                record_id: None,
            };
            let document = document.clone();
            fetches.spawn(
                async move { (index, pipeline.fetch_and_record_snapshot(record, document).await) }
                    .in_current_span(),
            );
        }

        let mut failures = Vec::new();
        while let Some(joined) = fetches.join_next().await {
            match joined? {
                (_, Ok(None)) => {}
                (index, Ok(Some(message))) => failures.push((index, message)),
                (_, Err(err)) => return Err(err),
            }
        }

        failures.sort_by_key(|(index, _)| *index);
        Ok(failures.into_iter().map(|(_, message)| message).collect())
    }

    /// `Ok(Some(message))` when the document is inaccessible
    async fn fetch_and_record_snapshot(
        &self,
        mut record: RecordEvent,
        document: SourceDocument,
    ) -> ArchivistResult<Option<String>> {
        tracing::debug!(
            document_id = record.document_id.as_deref(),
            url = %document.location,
            "fetching document"
        );

        let fetched = match self.fetcher.fetch(FetchRequest::from(&document)).await {
            Ok(fetched) if fetched.content.is_empty() => {
                return Ok(Some(format!("{}: empty content", document.location)));
            }
            Ok(fetched) => fetched,
            Err(FetchError::Inaccessible(reason)) => {
                tracing::warn!(url = %document.location, %reason, "document inaccessible");
                return Ok(Some(format!("{}: {reason}", document.location)));
            }
            Err(err) => return Err(err.into()),
        };

        let saved = self
            .recorder
            .record_snapshot(SnapshotParams {
                service_id: record.service_id.clone(),
                terms_type: record.terms_type.clone(),
                document_id: record.document_id.clone(),
                fetch_date: Utc::now(),
                mime_type: fetched.mime_type,
                content: fetched.content,
            })
            .await?;

        let is_first_record = saved.as_ref().is_some_and(|s| s.is_first_record);
        record.record_id = saved.map(|s| s.id);
        match &record.record_id {
            Some(id) => tracing::info!(
                document_id = record.document_id.as_deref(),
                record_id = %id,
                first = is_first_record,
                "recorded snapshot"
            ),
            None => tracing::debug!(
                document_id = record.document_id.as_deref(),
                "snapshot not changed"
            ),
        }
        self.events
            .emit(ArchivistEvent::snapshot(record, is_first_record));
        Ok(None)
    }

    /// Latest snapshot of each document that has one, in declaration order
    async fn load_snapshots(&self, terms: &Terms) -> ArchivistResult<Vec<(SourceDocument, Record)>> {
        let mut snapshots = Vec::with_capacity(terms.documents.len());
        for document in &terms.documents {
            let document_id = terms.document_id(document);
            match self
                .recorder
                .get_latest_snapshot(&terms.service_id, &terms.terms_type, document_id)
                .await?
            {
                Some(snapshot) => snapshots.push((document.clone(), snapshot)),
                None => tracing::debug!(document_id, "no snapshot for document"),
            }
        }
        Ok(snapshots)
    }

    /// Extract every snapshot concurrently and assemble the results in
    /// declaration order.
    async fn extract(&self, snapshots: &[(SourceDocument, Record)]) -> ArchivistResult<String> {
        let mut extractions = JoinSet::new();
        for (index, (document, snapshot)) in snapshots.iter().enumerate() {
            let extractor = Arc::clone(&self.extractor);
            let request = ExtractRequest {
                content: snapshot.content.clone(),
                mime_type: snapshot.mime_type.clone(),
                document: document.clone(),
            };
            extractions.spawn(
                async move { (index, extractor.extract(request).await) }.in_current_span(),
            );
        }

        let mut contents = vec![String::new(); snapshots.len()];
        let mut inaccessible = Vec::new();
        while let Some(joined) = extractions.join_next().await {
            match joined? {
                (index, Ok(content)) => contents[index] = content,
                (index, Err(ExtractError::Inaccessible(reason))) => {
                    inaccessible.push((index, format!("{}: {reason}", snapshots[index].0.location)));
                }
                (_, Err(err)) => return Err(err.into()),
            }
        }

        if !inaccessible.is_empty() {
            inaccessible.sort_by_key(|(index, _)| *index);
            return Err(ArchivistError::InaccessibleContent(
                inaccessible.into_iter().map(|(_, message)| message).collect(),
            ));
        }

        let content = contents.join(DOCUMENT_SEPARATOR);
        if content.trim().is_empty() {
            return Err(ArchivistError::InaccessibleContent(vec![
                "no content could be extracted from the snapshots".to_string(),
            ]));
        }
        Ok(content)
    }

    async fn record_version(
        &self,
        terms: &Terms,
        snapshots: &[(SourceDocument, Record)],
        content: String,
        extract_only: bool,
    ) -> ArchivistResult<Option<SavedRecord>> {
        let Some((_, anchor)) = snapshots.first() else {
            return Ok(None);
        };
        let snapshot_ids: Vec<RecordId> = snapshots
            .iter()
            .filter_map(|(_, snapshot)| snapshot.id.clone())
            .collect();

        let saved = self
            .recorder
            .record_version(VersionParams {
                service_id: terms.service_id.clone(),
                terms_type: terms.terms_type.clone(),
                snapshot_ids,
                fetch_date: anchor.fetch_date,
                mime_type: VERSION_MIME_TYPE.to_string(),
                content: content.into_bytes(),
                is_extract_only: extract_only,
            })
            .await?;

        let is_first_record = saved.as_ref().is_some_and(|s| s.is_first_record);
        match &saved {
            Some(s) => tracing::info!(record_id = %s.id, first = is_first_record, "recorded version"),
            None => tracing::debug!("version not changed"),
        }
        self.events.emit(ArchivistEvent::version(
            RecordEvent {
                service_id: terms.service_id.clone(),
                terms_type: terms.terms_type.clone(),
                document_id: None,
                record_id: saved.as_ref().map(|s| s.id.clone()),
            },
            is_first_record,
        ));
        Ok(saved)
    }
}

fn terms_span(terms: &Terms) -> tracing::Span {
    tracing::info_span!(
        "terms",
        service_id = %terms.service_id,
        terms_type = %terms.terms_type
    )
}

// ============================================================================
// Archivist
// ============================================================================

pub struct Archivist {
    pipeline: Pipeline,
    declarations: Arc<Declarations>,
    config: ArchivistConfig,
}

impl Archivist {
    pub fn new(context: ArchivistContext, config: ArchivistConfig) -> Self {
        Self {
            pipeline: Pipeline {
                recorder: context.recorder,
                fetcher: context.fetcher,
                extractor: context.extractor,
                events: Arc::new(EventBus::new()),
            },
            declarations: context.declarations,
            config,
        }
    }

    pub fn attach(&self, listener: Arc<dyn Listener>) {
        self.pipeline.events.attach(listener);
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.pipeline.events
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.pipeline.recorder
    }

    pub fn declarations(&self) -> &Declarations {
        &self.declarations
    }

    pub fn config(&self) -> &ArchivistConfig {
        &self.config
    }

    pub async fn initialize(&self) -> ArchivistResult<()> {
        self.pipeline.recorder.initialize().await?;
        Ok(())
    }

    pub async fn finalize(&self) -> ArchivistResult<()> {
        self.pipeline.recorder.finalize().await?;
        Ok(())
    }

    /// Queue concurrency of a batch
    pub fn concurrency_for(&self, extract_only: bool) -> usize {
        if extract_only {
            self.config.extract_only_concurrency
        } else {
            self.config.live_concurrency
        }
    }

    /// Run the pipeline for a single terms, outside of any batch.
    pub async fn track_terms(
        &self,
        terms: Terms,
        extract_only: bool,
    ) -> ArchivistResult<TermsOutcome> {
        let span = terms_span(&terms);
        self.pipeline.run(terms, extract_only).instrument(span).await
    }

    /// Track every selected terms, then wait for the whole batch.
    ///
    /// Recoverable failures are reported as `inaccessibleContent` events and
    /// do not stop the batch. A fatal failure stops the queue, releases the
    /// fetcher and finalizes the recorder, then is returned. A fetcher that
    /// fails to launch goes through the same shutdown. If that shutdown
    /// outlasts the configured timeout, [`ArchivistError::ShutdownTimeout`]
    /// is returned instead.
    pub async fn track(&self, options: TrackOptions) -> ArchivistResult<TrackReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("track", %run_id, extract_only = options.extract_only);
        self.run_batch(run_id, options).instrument(span).await
    }

    async fn run_batch(&self, run_id: Uuid, options: TrackOptions) -> ArchivistResult<TrackReport> {
        let extract_only = options.extract_only;
        let service_ids = options
            .services
            .unwrap_or_else(|| self.declarations.service_ids());
        let terms = for_each_terms(
            &self.declarations,
            &service_ids,
            options.terms_types.as_deref(),
        );

        let report = TrackReport {
            run_id,
            services: terms
                .iter()
                .map(|t| t.service_id.as_str())
                .collect::<BTreeSet<_>>()
                .len(),
            terms: terms.len(),
            extract_only,
        };
        let tracking = TrackingEvent {
            run_id,
            services: report.services,
            terms: report.terms,
            extract_only,
        };

        tracing::info!(
            services = report.services,
            terms = report.terms,
            "tracking started"
        );
        self.pipeline
            .events
            .emit(ArchivistEvent::TrackingStarted(tracking.clone()));

        if !extract_only {
            if let Err(err) = self.pipeline.fetcher.launch().await {
                let error = ArchivistError::from(err);
                tracing::error!(error = %error, "failed to launch fetcher, shutting down");
                return self.shut_down_after(error, self.shutdown(true)).await;
            }
        }

        let fatal: Arc<Mutex<Option<ArchivistError>>> = Arc::new(Mutex::new(None));
        let queue = TrackingQueue::new(
            self.concurrency_for(extract_only),
            self.config.queue_capacity,
            self.processor(extract_only),
            self.error_handler(Arc::clone(&fatal)),
        );
        let control = queue.control();

        for item in terms {
            if !queue.push(item).await {
                break;
            }
        }

        let drain = queue.drain();
        tokio::pin!(drain);
        let drained = tokio::select! {
            _ = &mut drain => true,
            () = control.stopped() => false,
        };

        let failure = fatal.lock().take();
        let Some(error) = failure else {
            if !drained {
                drain.as_mut().await;
            }
            if !extract_only {
                if let Err(err) = self.pipeline.fetcher.stop().await {
                    tracing::warn!(error = %err, "failed to stop fetcher");
                }
            }
            tracing::info!(
                services = report.services,
                terms = report.terms,
                "tracking completed"
            );
            self.pipeline
                .events
                .emit(ArchivistEvent::TrackingCompleted(tracking));
            return Ok(report);
        };

        let graceful = async {
            if !drained {
                drain.as_mut().await;
            }
            self.shutdown(!extract_only).await;
        };
        self.shut_down_after(error, graceful).await
    }

    /// Run `graceful` under the shutdown watchdog, then surface `error`.
    async fn shut_down_after(
        &self,
        error: ArchivistError,
        graceful: impl Future<Output = ()>,
    ) -> ArchivistResult<TrackReport> {
        match tokio::time::timeout(self.config.shutdown_timeout(), graceful).await {
            Ok(()) => Err(error),
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.config.shutdown_timeout_secs,
                    "graceful shutdown timed out"
                );
                Err(ArchivistError::ShutdownTimeout {
                    secs: self.config.shutdown_timeout_secs,
                })
            }
        }
    }

    fn processor(&self, extract_only: bool) -> Processor<Terms> {
        let pipeline = self.pipeline.clone();
        Arc::new(move |terms: Terms| -> JobFuture {
            let pipeline = pipeline.clone();
            let span = terms_span(&terms);
            Box::pin(
                async move { pipeline.run(terms, extract_only).await.map(|_| ()) }.instrument(span),
            )
        })
    }

    fn error_handler(&self, fatal: Arc<Mutex<Option<ArchivistError>>>) -> ErrorHandler<Terms> {
        let events = Arc::clone(&self.pipeline.events);
        let quota_marker = self.config.quota_error_marker.clone();

        Arc::new(
            move |terms: Terms, error: ArchivistError, control: &QueueControl| {
                let event = ErrorEvent {
                    service_id: terms.service_id,
                    terms_type: terms.terms_type,
                    message: error.to_string(),
                };

                match error.severity(&quota_marker) {
                    Severity::Ignored => tracing::debug!(
                        service_id = %event.service_id,
                        terms_type = %event.terms_type,
                        error = %event.message,
                        "ignoring quota error"
                    ),
                    Severity::Recoverable => {
                        tracing::warn!(
                            service_id = %event.service_id,
                            terms_type = %event.terms_type,
                            error = %event.message,
                            "inaccessible content"
                        );
                        events.emit(ArchivistEvent::InaccessibleContent(event));
                    }
                    Severity::Fatal => {
                        tracing::error!(
                            service_id = %event.service_id,
                            terms_type = %event.terms_type,
                            error = %event.message,
                            "fatal tracking error, shutting down"
                        );
                        events.emit(ArchivistEvent::Error(event));
                        fatal.lock().get_or_insert(error);
                        control.stop();
                    }
                }
            },
        )
    }

    /// Release shared resources after a fatal error. Failures are logged:
    /// the original error is what the caller needs to see.
    async fn shutdown(&self, release_fetcher: bool) {
        if release_fetcher {
            if let Err(err) = self.pipeline.fetcher.stop().await {
                tracing::error!(error = %err, "failed to stop fetcher during shutdown");
            }
        }
        if let Err(err) = self.pipeline.recorder.finalize().await {
            tracing::error!(error = %err, "failed to finalize recorder during shutdown");
        }
    }
}
