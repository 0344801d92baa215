//! Error taxonomy of the tracking pipeline and its classification.

use archivist_storage::StorageError;
use thiserror::Error;

/// Failure reported by a [`crate::Fetcher`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The document answered, but not with usable content (HTTP error status,
    /// empty body, selectors never showing up...). Recoverable per terms.
    #[error("{0}")]
    Inaccessible(String),

    /// The transport itself failed (name resolution, TLS, browser crash...).
    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Failure reported by an [`crate::Extractor`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// The snapshot does not contain the declared content (selectors match
    /// nothing). Recoverable per terms.
    #[error("{0}")]
    Inaccessible(String),

    #[error("Extraction failure: {0}")]
    Other(String),
}

/// Invalid service declaration.
#[derive(Debug, Error)]
pub enum DeclarationError {
    #[error("Invalid declaration of service `{service_id}`: {source}")]
    Parse {
        service_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Terms `{terms_type}` of service `{service_id}` declare no document")]
    NoDocuments {
        service_id: String,
        terms_type: String,
    },

    #[error(
        "Terms `{terms_type}` of service `{service_id}` combine several documents, each needs an `id`"
    )]
    MissingDocumentId {
        service_id: String,
        terms_type: String,
    },

    #[error(
        "Terms `{terms_type}` of service `{service_id}` declare document id `{document_id}` twice"
    )]
    DuplicateDocumentId {
        service_id: String,
        terms_type: String,
        document_id: String,
    },
}

#[derive(Debug, Error)]
pub enum ArchivistError {
    /// Every soft failure of one terms run, in the order they were observed
    #[error(
        "The documents cannot be accessed or their contents can not be selected: {}",
        .0.join("; ")
    )]
    InaccessibleContent(Vec<String>),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    /// A pipeline task panicked or was aborted
    #[error("Tracking task failed: {0}")]
    Task(String),

    #[error("Graceful shutdown did not complete within {secs}s")]
    ShutdownTimeout { secs: u64 },
}

impl From<tokio::task::JoinError> for ArchivistError {
    fn from(err: tokio::task::JoinError) -> Self {
        ArchivistError::Task(err.to_string())
    }
}

pub type ArchivistResult<T> = Result<T, ArchivistError>;

/// How a failed terms run affects the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Reported through an `inaccessibleContent` event; the batch goes on
    Recoverable,
    /// Known transient third-party condition; dropped silently
    Ignored,
    /// Stops the batch and shuts the process down
    Fatal,
}

impl ArchivistError {
    /// Classify this error. `quota_marker` is matched against the rendered
    /// message; an empty marker disables the check.
    pub fn severity(&self, quota_marker: &str) -> Severity {
        if !quota_marker.is_empty() && self.to_string().contains(quota_marker) {
            return Severity::Ignored;
        }

        match self {
            ArchivistError::InaccessibleContent(_)
            | ArchivistError::Fetch(FetchError::Inaccessible(_))
            | ArchivistError::Extract(ExtractError::Inaccessible(_)) => Severity::Recoverable,
            _ => Severity::Fatal,
        }
    }
}
