//! HTTP fetching with a process-wide rate-limit backoff.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, ClientBuilder};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// How many times a URL is retried after a 429 before giving up.
pub const MAX_RATE_LIMIT_RETRIES: usize = 1;

const TOO_MANY_REQUESTS: u16 = 429;

// Create a static client to reuse connections
static CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .pool_max_idle_per_host(10)
        .build()
        .expect("Failed to build HTTP client")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("still rate limited after retry for {url}")]
    RateLimited { url: String },
}

/// Status and body of a completed GET.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError>;
}

/// Production transport backed by a shared `reqwest` client.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReqwestTransport;

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let transport_error = |e: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = CLIENT.get(url).send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        Ok(HttpResponse { status, body })
    }
}

/// Shared `Normal`/`Limited` flag.
///
/// Reads and writes are relaxed; concurrent fetches may briefly disagree on
/// the state, which only affects how long they wait.
#[derive(Debug)]
pub struct RateLimiter {
    limited: AtomicBool,
    backoff: Duration,
}

impl RateLimiter {
    pub fn new(backoff: Duration) -> Self {
        Self {
            limited: AtomicBool::new(false),
            backoff,
        }
    }

    pub fn is_limited(&self) -> bool {
        self.limited.load(Ordering::Relaxed)
    }

    fn trip(&self) {
        self.limited.store(true, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.limited.store(false, Ordering::Relaxed);
    }

    /// Sleeps for the backoff if some fetch has seen a 429.
    async fn wait_if_limited(&self) {
        if self.is_limited() {
            warn!(
                backoff_secs = self.backoff.as_secs_f64(),
                "Rate limit reached. Waiting before next request"
            );
            tokio::time::sleep(self.backoff).await;
        }
    }
}

pub struct ContentFetcher {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
}

impl ContentFetcher {
    pub fn new(transport: Arc<dyn Transport>, limiter: Arc<RateLimiter>) -> Self {
        Self { transport, limiter }
    }

    #[cfg(test)]
    pub(crate) fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Fetches the body of `url`, retrying once on 429.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            self.limiter.wait_if_limited().await;

            debug!(attempt, "Fetching {}", url);
            let response = self.transport.get(url).await.inspect_err(|e| {
                error!("Request failed: {}", e);
            })?;

            if response.is_success() {
                self.limiter.reset();
                return Ok(response.body);
            }

            if response.status == TOO_MANY_REQUESTS {
                self.limiter.trip();
                error!(attempt, "Hit rate limit for {}. Requests will wait for some time", url);
                continue;
            }

            error!(
                status = response.status,
                body_len = response.body.len(),
                "Unexpected response for {}",
                url
            );
            return Err(FetchError::HttpStatus {
                status: response.status,
                url: url.to_string(),
            });
        }

        Err(FetchError::RateLimited { url: url.to_string() })
    }
}
