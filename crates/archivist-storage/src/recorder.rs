//! Recorder: domain façade over the snapshots and versions repositories
//!
//! Validates records before they reach a repository and enforces lineage:
//! a version always names the snapshot(s) it was extracted from.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::record::{Record, RecordId, SavedRecord};
use crate::repository::Repository;

/// Input of [`Recorder::record_snapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotParams {
    pub service_id: String,
    pub terms_type: String,
    pub document_id: Option<String>,
    pub fetch_date: DateTime<Utc>,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// Input of [`Recorder::record_version`] and [`Recorder::record_refilter`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionParams {
    pub service_id: String,
    pub terms_type: String,
    /// Snapshots the version was extracted from, in declaration order
    pub snapshot_ids: Vec<RecordId>,
    pub fetch_date: DateTime<Utc>,
    pub mime_type: String,
    pub content: Vec<u8>,
    pub is_extract_only: bool,
}

fn require(value: &str, field: &'static str) -> StorageResult<()> {
    if value.trim().is_empty() {
        Err(StorageError::Validation { field })
    } else {
        Ok(())
    }
}

fn require_content(content: &[u8]) -> StorageResult<()> {
    if content.is_empty() {
        Err(StorageError::Validation { field: "content" })
    } else {
        Ok(())
    }
}

pub struct Recorder {
    snapshots: Arc<dyn Repository>,
    versions: Arc<dyn Repository>,
}

impl Recorder {
    pub fn new(snapshots: Arc<dyn Repository>, versions: Arc<dyn Repository>) -> Self {
        Self {
            snapshots,
            versions,
        }
    }

    pub fn snapshots(&self) -> &Arc<dyn Repository> {
        &self.snapshots
    }

    pub fn versions(&self) -> &Arc<dyn Repository> {
        &self.versions
    }

    pub async fn initialize(&self) -> StorageResult<()> {
        tokio::try_join!(self.snapshots.initialize(), self.versions.initialize())?;
        Ok(())
    }

    pub async fn finalize(&self) -> StorageResult<()> {
        tokio::try_join!(self.snapshots.finalize(), self.versions.finalize())?;
        Ok(())
    }

    pub async fn get_latest_snapshot(
        &self,
        service_id: &str,
        terms_type: &str,
        document_id: Option<&str>,
    ) -> StorageResult<Option<Record>> {
        self.snapshots
            .find_latest(service_id, terms_type, document_id)
            .await
    }

    pub async fn get_latest_version(
        &self,
        service_id: &str,
        terms_type: &str,
    ) -> StorageResult<Option<Record>> {
        self.versions.find_latest(service_id, terms_type, None).await
    }

    /// Save raw fetched content. `None` means the content equals the tip.
    pub async fn record_snapshot(
        &self,
        params: SnapshotParams,
    ) -> StorageResult<Option<SavedRecord>> {
        require(&params.service_id, "service_id")?;
        require(&params.terms_type, "terms_type")?;
        require(&params.mime_type, "mime_type")?;
        require_content(&params.content)?;

        let record = Record::new(
            params.service_id,
            params.terms_type,
            params.mime_type,
            params.fetch_date,
            params.content,
        )
        .with_document_id(params.document_id);

        self.snapshots.save(record).await
    }

    /// Save normalized content. `None` means the content equals the tip.
    pub async fn record_version(
        &self,
        params: VersionParams,
    ) -> StorageResult<Option<SavedRecord>> {
        require(&params.service_id, "service_id")?;
        require(&params.terms_type, "terms_type")?;
        require(&params.mime_type, "mime_type")?;
        require_content(&params.content)?;
        if params.snapshot_ids.iter().all(|id| id.trim().is_empty()) {
            return Err(StorageError::MissingSnapshotReference);
        }

        let mut snapshot_ids: Vec<RecordId> = Vec::with_capacity(params.snapshot_ids.len());
        for id in params.snapshot_ids {
            if !id.trim().is_empty() && !snapshot_ids.contains(&id) {
                snapshot_ids.push(id);
            }
        }
        for id in &snapshot_ids {
            self.check_snapshot_reference(id, &params.service_id, &params.terms_type)
                .await?;
        }

        let record = Record::new(
            params.service_id,
            params.terms_type,
            params.mime_type,
            params.fetch_date,
            params.content,
        )
        .with_snapshot_ids(snapshot_ids)
        .extract_only(params.is_extract_only);

        self.versions.save(record).await
    }

    /// A version may only reference stored snapshots of its own terms.
    async fn check_snapshot_reference(
        &self,
        id: &str,
        service_id: &str,
        terms_type: &str,
    ) -> StorageResult<()> {
        let Some(snapshot) = self.snapshots.find_by_id(id).await? else {
            return Err(StorageError::UnknownSnapshot { id: id.to_string() });
        };
        if snapshot.service_id != service_id || snapshot.terms_type != terms_type {
            return Err(StorageError::ForeignSnapshot {
                id: id.to_string(),
                service_id: snapshot.service_id,
                terms_type: snapshot.terms_type,
            });
        }
        Ok(())
    }

    /// [`Recorder::record_version`] with `is_extract_only` forced on
    pub async fn record_refilter(
        &self,
        params: VersionParams,
    ) -> StorageResult<Option<SavedRecord>> {
        self.record_version(VersionParams {
            is_extract_only: true,
            ..params
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryRepository;

    async fn recorder() -> Recorder {
        let recorder = Recorder::new(
            Arc::new(MemoryRepository::new()),
            Arc::new(MemoryRepository::new()),
        );
        recorder.initialize().await.unwrap();
        recorder
    }

    fn snapshot_params(content: &str) -> SnapshotParams {
        SnapshotParams {
            service_id: "Service".to_string(),
            terms_type: "Terms of Service".to_string(),
            document_id: None,
            fetch_date: Utc::now(),
            mime_type: "text/html".to_string(),
            content: content.as_bytes().to_vec(),
        }
    }

    fn version_params(content: &str, snapshot_ids: &[&str]) -> VersionParams {
        VersionParams {
            service_id: "Service".to_string(),
            terms_type: "Terms of Service".to_string(),
            snapshot_ids: snapshot_ids.iter().map(|id| id.to_string()).collect(),
            fetch_date: Utc::now(),
            mime_type: "text/markdown".to_string(),
            content: content.as_bytes().to_vec(),
            is_extract_only: false,
        }
    }

    #[tokio::test]
    async fn test_snapshot_validation() {
        let recorder = recorder().await;

        let mut params = snapshot_params("a");
        params.service_id.clear();
        let err = recorder.record_snapshot(params).await.unwrap_err();
        assert!(matches!(err, StorageError::Validation { field: "service_id" }));

        let mut params = snapshot_params("a");
        params.mime_type = " ".to_string();
        let err = recorder.record_snapshot(params).await.unwrap_err();
        assert!(matches!(err, StorageError::Validation { field: "mime_type" }));

        let err = recorder.record_snapshot(snapshot_params("")).await.unwrap_err();
        assert!(matches!(err, StorageError::Validation { field: "content" }));

        assert_eq!(recorder.snapshots().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_version_requires_snapshot_reference() {
        let recorder = recorder().await;

        let err = recorder
            .record_version(version_params("a", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingSnapshotReference));

        let err = recorder
            .record_version(version_params("a", &[""]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingSnapshotReference));
        assert_eq!(recorder.versions().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_snapshot_then_unchanged() {
        let recorder = recorder().await;

        let first = recorder.record_snapshot(snapshot_params("a")).await.unwrap().unwrap();
        assert!(first.is_first_record);
        assert!(recorder.record_snapshot(snapshot_params("a")).await.unwrap().is_none());

        let latest = recorder
            .get_latest_snapshot("Service", "Terms of Service", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, Some(first.id));
        assert!(latest.snapshot_ids.is_empty());
    }

    async fn seeded(recorder: &Recorder, document_id: Option<&str>, content: &str) -> RecordId {
        let mut params = snapshot_params(content);
        params.document_id = document_id.map(str::to_string);
        recorder.record_snapshot(params).await.unwrap().unwrap().id
    }

    #[tokio::test]
    async fn test_record_version_keeps_lineage_order() {
        let recorder = recorder().await;
        let main = seeded(&recorder, Some("main"), "foo").await;
        let annex = seeded(&recorder, Some("annex"), "bar").await;

        recorder
            .record_version(version_params(
                "foo\n\nbar",
                &[main.as_str(), annex.as_str(), main.as_str()],
            ))
            .await
            .unwrap()
            .unwrap();

        let latest = recorder
            .get_latest_version("Service", "Terms of Service")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.snapshot_ids, vec![main, annex]);
        assert!(latest.is_first_record);
        assert!(!latest.is_extract_only);
    }

    #[tokio::test]
    async fn test_version_rejects_unknown_snapshot() {
        let recorder = recorder().await;
        let known = seeded(&recorder, None, "a").await;

        let err = recorder
            .record_version(version_params("a", &[known.as_str(), "de34f"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownSnapshot { ref id } if id == "de34f"));
        assert_eq!(recorder.versions().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_version_rejects_snapshot_of_another_terms() {
        let recorder = recorder().await;
        let mut params = snapshot_params("a");
        params.terms_type = "Privacy Policy".to_string();
        let privacy = recorder.record_snapshot(params).await.unwrap().unwrap().id;

        let err = recorder
            .record_version(version_params("a", &[privacy.as_str()]))
            .await
            .unwrap_err();
        match err {
            StorageError::ForeignSnapshot {
                id,
                service_id,
                terms_type,
            } => {
                assert_eq!(id, privacy);
                assert_eq!(service_id, "Service");
                assert_eq!(terms_type, "Privacy Policy");
            }
            other => panic!("expected a foreign snapshot error, got {other}"),
        }
        assert_eq!(recorder.versions().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_refilter_forces_extract_only() {
        let recorder = recorder().await;
        let snapshot = seeded(&recorder, None, "a").await;

        recorder
            .record_version(version_params("a", &[snapshot.as_str()]))
            .await
            .unwrap();
        let saved = recorder
            .record_refilter(version_params("b", &[snapshot.as_str()]))
            .await
            .unwrap()
            .unwrap();
        assert!(!saved.is_first_record);

        let latest = recorder
            .get_latest_version("Service", "Terms of Service")
            .await
            .unwrap()
            .unwrap();
        assert!(latest.is_extract_only);
        assert!(latest.is_refilter());
    }

    #[tokio::test]
    async fn test_lifecycle_is_idempotent() {
        let recorder = recorder().await;
        recorder.initialize().await.unwrap();
        recorder.finalize().await.unwrap();
        recorder.finalize().await.unwrap();

        let err = recorder.record_snapshot(snapshot_params("a")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized));
    }
}
