//! Byte-fetch service consumed by the content cache
//!
//! The engine never talks HTTP directly; everything goes through the
//! [`Fetcher`] trait so tests can substitute an in-memory implementation
//! and count calls. [`HttpFetcher`] is the production implementation.
//!
//! Failures are classified at the transport boundary: 5xx, timeouts and
//! connection errors are transient (the cache retries them with backoff),
//! 4xx are terminal (surfaced immediately).

use async_trait::async_trait;
use thiserror::Error;

/// A single fetch failure, classified for retry purposes
#[derive(Error, Debug)]
pub enum FetchFailure {
    #[error("transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    #[error("terminal failure fetching {url}: {reason}")]
    Terminal { url: String, reason: String },
}

impl FetchFailure {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchFailure::Transient { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            FetchFailure::Transient { reason, .. } => reason,
            FetchFailure::Terminal { reason, .. } => reason,
        }
    }
}

/// Byte-fetching service keyed by URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchFailure>;
}

/// HTTP implementation of the byte-fetch service
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("etsm/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchFailure> {
        let response = self.client.get(url).send().await.map_err(|e| {
            // Network-level errors (DNS, connect, timeout) are worth retrying
            FetchFailure::Transient {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(FetchFailure::Transient {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(FetchFailure::Terminal {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let bytes = response.bytes().await.map_err(|e| FetchFailure::Transient {
            url: url.to_string(),
            reason: format!("failed to read body: {e}"),
        })?;

        Ok(bytes.to_vec())
    }
}
