// Rate-limited HTTP fetching with opt-in retry of transient transport
// errors.
//
// Transport is abstracted via `FetchBackend` so kernel tests can drive
// a scripted mock instead of the network. The transient retry here is
// distinct from the kernel's per-document backoff: it smooths over
// flaky connections within one update attempt, while backoff
// reschedules whole attempts across minutes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request to `{url}` failed: {message}")]
    Transport { url: String, message: String },

    #[error("`{url}` returned HTTP {status}")]
    Status { url: String, status: u16 },
}

impl FetchError {
    /// Transport-level failures may succeed on a quick retry; HTTP
    /// error statuses will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// A successfully fetched payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    pub body: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError>;
}

/// Production backend: reqwest with a configured user-agent and
/// per-request timeout.
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|error| anyhow::anyhow!("failed to build http client: {error}"))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FetchBackend for HttpBackend {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        let response = self.client.get(url).send().await.map_err(|error| {
            FetchError::Transport { url: url.to_string(), message: error.to_string() }
        })?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(FetchError::Status { url: url.to_string(), status: status.as_u16() });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|error| FetchError::Transport {
                url: url.to_string(),
                message: error.to_string(),
            })?
            .to_vec();

        Ok(FetchedDocument { body, content_type })
    }
}

/// Fetcher settings derived from daemon config.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub user_agent: String,
    pub request_timeout: Duration,
    /// Global requests-per-minute cap; 0 disables pacing.
    pub requests_per_minute: u32,
    /// Transient-error retries per fetch; 0 disables.
    pub fetch_retries: u32,
    pub fetch_retry_wait: Duration,
}

pub struct Fetcher {
    backend: Box<dyn FetchBackend>,
    min_interval: Duration,
    retries: u32,
    retry_wait: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Fetcher {
    pub fn new(settings: &FetchSettings) -> anyhow::Result<Self> {
        let backend = Box::new(HttpBackend::new(&settings.user_agent, settings.request_timeout)?);
        Ok(Self::with_backend(backend, settings))
    }

    pub fn with_backend(backend: Box<dyn FetchBackend>, settings: &FetchSettings) -> Self {
        let min_interval = if settings.requests_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(60.0 / f64::from(settings.requests_per_minute))
        };
        Self {
            backend,
            min_interval,
            retries: settings.fetch_retries,
            retry_wait: settings.fetch_retry_wait,
            last_request: Mutex::new(None),
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        self.pace().await;

        let mut attempt = 0;
        loop {
            match self.backend.fetch(url).await {
                Ok(doc) => return Ok(doc),
                Err(error) if error.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    warn!(%url, attempt, %error, "transient fetch error, retrying");
                    tokio::time::sleep(self.retry_wait).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Space successive requests at least `min_interval` apart. The lock
    /// is held across the sleep so concurrent callers queue politely.
    async fn pace(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last_request = self.last_request.lock().await;
        if let Some(previous) = *last_request {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last_request = Some(Instant::now());
    }
}
