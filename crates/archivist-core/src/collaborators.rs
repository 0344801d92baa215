//! Interfaces of the external fetch and extraction services.

use async_trait::async_trait;

use crate::error::{ExtractError, FetchError};
use crate::terms::SourceDocument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub execute_client_scripts: bool,
    /// Selectors to wait for when client scripts are executed
    pub css_selectors: Vec<String>,
}

impl From<&SourceDocument> for FetchRequest {
    fn from(document: &SourceDocument) -> Self {
        Self {
            url: document.location.clone(),
            execute_client_scripts: document.execute_client_scripts,
            css_selectors: document.select.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    pub content: Vec<u8>,
    pub mime_type: String,
}

/// Retrieves documents. A fetcher may hold a shared transport (a browser
/// instance, a connection pool) acquired by [`Fetcher::launch`] and released
/// by [`Fetcher::stop`]; both bracket every batch that performs live fetches.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn launch(&self) -> Result<(), FetchError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), FetchError> {
        Ok(())
    }

    async fn fetch(&self, request: FetchRequest) -> Result<FetchedContent, FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractRequest {
    pub content: Vec<u8>,
    pub mime_type: String,
    pub document: SourceDocument,
}

/// Turns a snapshot into normalized text
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: ExtractRequest) -> Result<String, ExtractError>;
}
