//! arXiv metadata retrieval.
//!
//! [`MetadataFetcher`] resolves an [`ArxivId`] to [`PaperMetadata`]:
//! cache first, then the arXiv Atom API, retrying a failed upstream call
//! once after a backoff. Unknown ids surface as
//! [`PaperBriefError::NotFound`]; persistent network or parse failures as
//! [`PaperBriefError::UpstreamUnavailable`].

mod atom;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paperbrief_shared::{AppConfig, ArxivId, PaperBriefError, PaperMetadata, Result};
use paperbrief_storage::{CacheStore, get_json, keys, set_json};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument, warn};

/// Maximum response size we accept from the query API (5 MB).
const MAX_RESPONSE_SIZE: u64 = 5 * 1024 * 1024;

/// User-Agent string for arXiv requests.
const USER_AGENT: &str = concat!("paperbrief/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Runtime configuration for the fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Query endpoint, e.g. `https://export.arxiv.org/api/query`.
    pub api_url: String,
    /// Timeout for one HTTP request.
    pub timeout: Duration,
    /// Delay before the single retry.
    pub retry_backoff: Duration,
}

impl From<&AppConfig> for FetcherConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            api_url: config.arxiv.api_url.clone(),
            timeout: Duration::from_secs(config.arxiv.timeout_secs),
            retry_backoff: Duration::from_millis(config.arxiv.retry_backoff_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// MetadataSource
// ---------------------------------------------------------------------------

/// Anything that can resolve an identifier to paper metadata.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, id: &ArxivId) -> Result<PaperMetadata>;
}

/// Cache-first arXiv metadata fetcher.
pub struct MetadataFetcher {
    client: Client,
    config: FetcherConfig,
    cache: Arc<dyn CacheStore>,
}

impl MetadataFetcher {
    pub fn new(config: FetcherConfig, cache: Arc<dyn CacheStore>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaperBriefError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            cache,
        })
    }

    /// Cached metadata, treating cache failures as misses.
    async fn cached(&self, key: &str) -> Option<PaperMetadata> {
        match get_json::<PaperMetadata>(self.cache.as_ref(), key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key, error = %e, "metadata cache read failed");
                None
            }
        }
    }

    /// One call to the query API.
    async fn fetch_upstream(&self, id: &ArxivId) -> Result<PaperMetadata> {
        let url = &self.config.api_url;
        let response = self
            .client
            .get(url)
            .query(&[("id_list", id.versioned().as_str()), ("max_results", "1")])
            .send()
            .await
            .map_err(|e| PaperBriefError::upstream(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
            return Err(PaperBriefError::not_found(id.to_string()));
        }
        if !status.is_success() {
            return Err(PaperBriefError::upstream(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_SIZE {
                return Err(PaperBriefError::upstream(format!(
                    "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
                )));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| PaperBriefError::upstream(format!("{url}: failed to read body: {e}")))?;

        let entry = atom::parse_feed(&body)?
            .into_iter()
            .next()
            .filter(|entry| !entry.is_error())
            .ok_or_else(|| PaperBriefError::not_found(id.to_string()))?;

        entry.into_metadata(id)
    }
}

#[async_trait]
impl MetadataSource for MetadataFetcher {
    #[instrument(skip_all, fields(arxiv_id = %id))]
    async fn fetch(&self, id: &ArxivId) -> Result<PaperMetadata> {
        let key = keys::metadata(id);
        if let Some(meta) = self.cached(&key).await {
            debug!("metadata cache hit");
            return Ok(meta);
        }

        info!("fetching metadata from arXiv");
        let meta = match self.fetch_upstream(id).await {
            Ok(meta) => meta,
            Err(e @ PaperBriefError::NotFound { .. }) => return Err(e),
            Err(first) => {
                warn!(error = %first, backoff_ms = self.config.retry_backoff.as_millis() as u64, "arXiv fetch failed, retrying once");
                tokio::time::sleep(self.config.retry_backoff).await;
                match self.fetch_upstream(id).await {
                    Ok(meta) => meta,
                    Err(e @ PaperBriefError::NotFound { .. }) => return Err(e),
                    Err(e @ PaperBriefError::UpstreamUnavailable(_)) => return Err(e),
                    Err(e) => return Err(PaperBriefError::upstream(e.to_string())),
                }
            }
        };

        if let Err(e) = set_json(self.cache.as_ref(), &key, &meta, keys::ttl::METADATA).await {
            warn!(error = %e, "metadata cache write failed");
        }

        info!(
            title = %meta.title,
            authors = meta.authors.len(),
            "metadata fetched"
        );
        Ok(meta)
    }
}
