//! HTTP fetcher.
//!
//! The shared transport is a pooled `reqwest` client built by `launch` and
//! dropped by `stop`. Documents declaring client scripts are fetched
//! statically: there is no headless browser behind this fetcher.

use std::time::Duration;

use archivist_core::{FetchError, FetchRequest, FetchedContent, Fetcher};
use archivist_storage::mime::DEFAULT_MIME_TYPE;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::{Host, Url};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub user_agent: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Larger documents are reported as inaccessible
    pub max_bytes: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("archivist/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 30,
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

fn build_http_client(config: &FetcherConfig) -> Result<Client, FetchError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&config.user_agent)
            .unwrap_or_else(|_| HeaderValue::from_static("archivist")),
    );

    Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| FetchError::Transport(format!("failed to build http client: {e}")))
}

/// `text/html; charset=utf-8` → `text/html`
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Failures once the host is known to resolve concern this document only.
fn classify(url: &Url, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Inaccessible(format!("Timed out fetching {url}"))
    } else if err.is_connect() {
        FetchError::Inaccessible(format!("Could not connect to {url}: {err}"))
    } else {
        FetchError::Transport(format!("Failed to fetch {url}: {err}"))
    }
}

/// Resolve the host before sending. A name that does not resolve means the
/// network itself is unusable, which stops the whole run.
async fn resolve(url: &Url) -> Result<(), FetchError> {
    let Some(Host::Domain(host)) = url.host() else {
        return Ok(());
    };
    let port = url.port_or_known_default().unwrap_or(80);
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|err| FetchError::Transport(format!("Could not resolve {host}: {err}")))?;
    if addrs.next().is_none() {
        return Err(FetchError::Transport(format!(
            "Could not resolve {host}: no address"
        )));
    }
    Ok(())
}

pub struct HttpFetcher {
    config: FetcherConfig,
    client: Mutex<Option<Client>>,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    pub fn is_launched(&self) -> bool {
        self.client.lock().is_some()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn launch(&self) -> Result<(), FetchError> {
        let client = build_http_client(&self.config)?;
        *self.client.lock() = Some(client);
        tracing::debug!(user_agent = %self.config.user_agent, "http fetcher launched");
        Ok(())
    }

    async fn stop(&self) -> Result<(), FetchError> {
        self.client.lock().take();
        tracing::debug!("http fetcher stopped");
        Ok(())
    }

    async fn fetch(&self, request: FetchRequest) -> Result<FetchedContent, FetchError> {
        let client = self
            .client
            .lock()
            .clone()
            .ok_or_else(|| FetchError::Transport("fetcher is not launched".to_string()))?;

        let url = Url::parse(&request.url)
            .map_err(|e| FetchError::Inaccessible(format!("Invalid URL {}: {e}", request.url)))?;
        if request.execute_client_scripts {
            tracing::debug!(%url, "client scripts requested, fetching statically");
        }

        resolve(&url).await?;
        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Inaccessible(format!(
                "Received HTTP code {} when trying to fetch {url}",
                status.as_u16()
            )));
        }

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(essence)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

        let max_bytes = self.config.max_bytes;
        if let Some(len) = response.content_length() {
            if len as usize > max_bytes {
                return Err(FetchError::Inaccessible(format!(
                    "Content length {len} of {url} exceeds {max_bytes} bytes"
                )));
            }
        }

        let body = response.bytes().await.map_err(|e| classify(&url, e))?;
        if body.len() > max_bytes {
            return Err(FetchError::Inaccessible(format!(
                "Body of {url} ({} bytes) exceeds {max_bytes} bytes",
                body.len()
            )));
        }
        if body.is_empty() {
            return Err(FetchError::Inaccessible(format!("Empty response from {url}")));
        }

        tracing::debug!(%url, mime_type, bytes = body.len(), "fetched");
        Ok(FetchedContent {
            content: body.to_vec(),
            mime_type,
        })
    }
}
