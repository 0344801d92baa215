//! Git-backed repository
//!
//! Each record is one commit touching one file of the working tree. Author
//! and committer dates are the record's fetch date, so history reads as a
//! timeline of the tracked documents. Saves are serialized through a FIFO
//! lock; every git operation runs on the blocking pool against a freshly
//! opened `git2::Repository` handle.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use git2::{Commit, Delta, ErrorCode, Signature, Sort, Tree};

use crate::codec;
use crate::error::{StorageError, StorageResult};
use crate::record::{Record, SavedRecord};
use crate::repository::{ChangeUnit, ChangedFile, Repository};
use crate::StorageConfig;

pub struct GitRepository {
    config: StorageConfig,
    /// Serializes writes and lifecycle transitions, in arrival order. A save
    /// moves its guard onto the blocking pool, so the lock outlives a caller
    /// that drops the future mid-commit.
    write_lock: Arc<tokio::sync::Mutex<()>>,
    initialized: AtomicBool,
}

impl GitRepository {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn ensure_initialized(&self) -> StorageResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }

    /// Run a read-only closure against the repository on the blocking pool.
    async fn read<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&git2::Repository) -> StorageResult<T> + Send + 'static,
    {
        self.ensure_initialized()?;
        let root = self.config.path.clone();
        tokio::task::spawn_blocking(move || {
            let repo = git2::Repository::open(&root)?;
            f(&repo)
        })
        .await?
    }
}

// ============================================================================
// Blocking helpers
// ============================================================================

fn open_or_init(root: &Path) -> StorageResult<bool> {
    std::fs::create_dir_all(root)?;
    match git2::Repository::open(root) {
        Ok(_) => Ok(false),
        Err(err) if err.code() == ErrorCode::NotFound => {
            let repo = git2::Repository::init(root)?;
            let mut repo_config = repo.config()?;
            if let Err(err) = repo_config.set_bool("commit.gpgsign", false) {
                tracing::warn!(error = %err, path = %root.display(), "failed to disable commit signing");
            }
            Ok(true)
        }
        Err(err) => Err(err.into()),
    }
}

fn head_commit(repo: &git2::Repository) -> Option<Commit<'_>> {
    repo.head().ok().and_then(|head| head.peel_to_commit().ok())
}

fn blob_at(repo: &git2::Repository, tree: &Tree<'_>, path: &str) -> StorageResult<Option<Vec<u8>>> {
    let entry = match tree.get_path(Path::new(path)) {
        Ok(entry) => entry,
        Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let blob = entry.to_object(repo)?.peel_to_blob()?;
    Ok(Some(blob.content().to_vec()))
}

/// Paths touched by `commit` relative to its first parent. A record whose
/// extension changed deletes its previous file in the same commit; that
/// deletion is part of the same logical record and is not reported.
fn touched_paths(repo: &git2::Repository, commit: &Commit<'_>) -> StorageResult<Vec<String>> {
    let tree = commit.tree()?;
    let parent_tree = if commit.parent_count() > 0 {
        Some(commit.parent(0)?.tree()?)
    } else {
        None
    };
    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

    let mut written = Vec::new();
    let mut deleted = Vec::new();
    for delta in diff.deltas() {
        let is_deletion = delta.status() == Delta::Deleted;
        let file = if is_deletion {
            delta.old_file()
        } else {
            delta.new_file()
        };
        let Some(path) = file.path() else {
            continue;
        };
        // git2 paths are `/`-separated on every platform; normalize anyway
        let path = path.to_string_lossy().replace('\\', "/");
        if is_deletion {
            deleted.push(path);
        } else {
            written.push(path);
        }
    }

    deleted.retain(|path| !written.iter().any(|kept| codec::same_record_path(kept, path)));
    written.extend(deleted);
    Ok(written)
}

/// Files of the same `(service, terms type, document)` as `path` stored
/// under another extension.
fn stale_paths(repo: &git2::Repository, tree: &Tree<'_>, path: &str) -> StorageResult<Vec<String>> {
    let Some((service_id, _)) = path.rsplit_once('/') else {
        return Ok(Vec::new());
    };
    let entry = match tree.get_path(Path::new(service_id)) {
        Ok(entry) => entry,
        Err(err) if err.code() == ErrorCode::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let Ok(service_tree) = entry.to_object(repo)?.peel_to_tree() else {
        return Ok(Vec::new());
    };

    Ok(service_tree
        .iter()
        .filter_map(|file| file.name().map(|name| format!("{service_id}/{name}")))
        .filter(|candidate| candidate != path && codec::same_record_path(path, candidate))
        .collect())
}

fn change_unit(
    repo: &git2::Repository,
    commit: &Commit<'_>,
    paths: Vec<String>,
) -> StorageResult<ChangeUnit> {
    let tree = commit.tree()?;
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let content = blob_at(repo, &tree, &path)?.unwrap_or_default();
        files.push(ChangedFile { path, content });
    }

    Ok(ChangeUnit {
        id: commit.id().to_string(),
        message: commit.message().unwrap_or_default().to_string(),
        date: DateTime::from_timestamp(commit.author().when().seconds(), 0).unwrap_or_default(),
        files,
    })
}

fn decode(repo: &git2::Repository, commit: &Commit<'_>) -> StorageResult<Record> {
    let paths = touched_paths(repo, commit)?;
    codec::to_domain(&change_unit(repo, commit, paths)?)
}

fn walk(repo: &git2::Repository, sorting: Sort) -> StorageResult<Vec<git2::Oid>> {
    if head_commit(repo).is_none() {
        return Ok(Vec::new());
    }
    let mut revwalk = repo.revwalk()?;
    revwalk.set_sorting(sorting)?;
    revwalk.push_head()?;
    Ok(revwalk.collect::<Result<Vec<_>, _>>()?)
}

fn subtree_id(tree: &Tree<'_>, service_id: &str) -> StorageResult<Option<git2::Oid>> {
    match tree.get_path(Path::new(service_id)) {
        Ok(entry) => Ok(Some(entry.id())),
        Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Whether `commit` changed anything under the `service_id` directory.
/// Comparing subtree ids avoids diffing commits of other services.
fn touches_service(commit: &Commit<'_>, service_id: &str) -> StorageResult<bool> {
    let current = subtree_id(&commit.tree()?, service_id)?;
    let parent = if commit.parent_count() > 0 {
        subtree_id(&commit.parent(0)?.tree()?, service_id)?
    } else {
        None
    };
    Ok(current != parent)
}

/// Newest commit touching `(service, terms type, document)` at any
/// extension, with the paths it touched.
fn latest_change<'r>(
    repo: &'r git2::Repository,
    service_id: &str,
    terms_type: &str,
    document_id: Option<&str>,
) -> StorageResult<Option<(Commit<'r>, Vec<String>)>> {
    for oid in walk(repo, Sort::TOPOLOGICAL)? {
        let commit = repo.find_commit(oid)?;
        if !touches_service(&commit, service_id)? {
            continue;
        }
        let paths = touched_paths(repo, &commit)?;
        if paths
            .iter()
            .any(|path| codec::path_matches(path, service_id, terms_type, document_id))
        {
            return Ok(Some((commit, paths)));
        }
    }
    Ok(None)
}

fn save_blocking(
    root: &Path,
    config: &StorageConfig,
    mut record: Record,
) -> StorageResult<Option<SavedRecord>> {
    let repo = git2::Repository::open(root)?;
    let parent = head_commit(&repo);

    let path = codec::generate_file_path(
        &record.service_id,
        &record.terms_type,
        record.document_id.as_deref(),
        Some(&record.mime_type),
    );

    // Compare against the tuple's latest record whatever its extension: a
    // document switching back to an earlier mime type is still a change.
    let latest = latest_change(
        &repo,
        &record.service_id,
        &record.terms_type,
        record.document_id.as_deref(),
    )?;
    record.is_first_record = match &latest {
        Some((commit, paths)) => {
            if paths.iter().any(|touched| touched == &path)
                && blob_at(&repo, &commit.tree()?, &path)?.as_deref()
                    == Some(record.content.as_slice())
            {
                return Ok(None);
            }
            false
        }
        None => true,
    };

    let encoded = codec::to_persistence(&record, &config.snapshot_identifier_template);

    let absolute: PathBuf = root.join(&encoded.file_path);
    if let Some(dir) = absolute.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&absolute, &encoded.content)?;

    let mut index = repo.index()?;
    if let Some(commit) = &parent {
        for stale in stale_paths(&repo, &commit.tree()?, &encoded.file_path)? {
            match std::fs::remove_file(root.join(&stale)) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
            index.remove_path(Path::new(&stale))?;
            tracing::debug!(path = %stale, "replacing file stored under another extension");
        }
    }
    index.add_path(Path::new(&encoded.file_path))?;
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;

    let when = git2::Time::new(record.fetch_date.timestamp(), 0);
    let signature = Signature::new(&config.author_name, &config.author_email, &when)?;
    let parents: Vec<&Commit<'_>> = parent.iter().collect();

    let oid = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        &encoded.message,
        &tree,
        &parents,
    )?;

    Ok(Some(SavedRecord {
        id: oid.to_string(),
        is_first_record: record.is_first_record,
    }))
}

// ============================================================================
// Repository implementation
// ============================================================================

#[async_trait]
impl Repository for GitRepository {
    async fn initialize(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        let root = self.config.path.clone();
        let created = tokio::task::spawn_blocking(move || open_or_init(&root)).await??;
        if created {
            tracing::info!(path = %self.config.path.display(), "initialized git repository");
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn finalize(&self) -> StorageResult<()> {
        // Waiting for the lock lets an in-flight save complete first.
        let _guard = self.write_lock.lock().await;
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn save(&self, record: Record) -> StorageResult<Option<SavedRecord>> {
        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        self.ensure_initialized()?;

        let root = self.config.path.clone();
        let config = self.config.clone();
        let saved = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            save_blocking(&root, &config, record)
        })
        .await??;

        if let Some(saved) = &saved {
            tracing::debug!(
                record_id = %saved.id,
                first = saved.is_first_record,
                repository = %self.config.path.display(),
                "committed record"
            );
        }
        Ok(saved)
    }

    async fn find_latest(
        &self,
        service_id: &str,
        terms_type: &str,
        document_id: Option<&str>,
    ) -> StorageResult<Option<Record>> {
        let service_id = service_id.to_string();
        let terms_type = terms_type.to_string();
        let document_id = document_id.map(str::to_string);

        self.read(move |repo| {
            match latest_change(repo, &service_id, &terms_type, document_id.as_deref())? {
                Some((commit, paths)) => codec::to_domain(&change_unit(repo, &commit, paths)?).map(Some),
                None => Ok(None),
            }
        })
        .await
    }

    async fn find_by_id(&self, id: &str) -> StorageResult<Option<Record>> {
        let id = id.to_string();
        self.read(move |repo| {
            let commit = match repo
                .revparse_single(&id)
                .and_then(|object| object.peel_to_commit())
            {
                Ok(commit) => commit,
                Err(err)
                    if matches!(
                        err.code(),
                        ErrorCode::NotFound | ErrorCode::InvalidSpec | ErrorCode::Ambiguous
                    ) =>
                {
                    return Ok(None)
                }
                Err(err) => return Err(err.into()),
            };
            decode(repo, &commit).map(Some)
        })
        .await
    }

    async fn find_all(&self) -> StorageResult<Vec<Record>> {
        self.read(|repo| {
            walk(repo, Sort::TOPOLOGICAL | Sort::REVERSE)?
                .into_iter()
                .map(|oid| decode(repo, &repo.find_commit(oid)?))
                .collect()
        })
        .await
    }

    async fn count(&self) -> StorageResult<usize> {
        self.read(|repo| Ok(walk(repo, Sort::NONE)?.len())).await
    }

    async fn remove_all(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let root = self.config.path.clone();
        let reopen = self.initialized.load(Ordering::SeqCst);

        tokio::task::spawn_blocking(move || -> StorageResult<()> {
            if root.exists() {
                std::fs::remove_dir_all(&root)?;
            }
            if reopen {
                open_or_init(&root)?;
            }
            Ok(())
        })
        .await??;

        tracing::warn!(path = %self.config.path.display(), "removed repository history");
        Ok(())
    }
}
