use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const MAX_PAGE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching a single page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, interrupted body)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// A single attempt exceeded the request timeout
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with a status that is not retried, or a transient
    /// status that persisted through every retry
    #[error("HTTP error: status {0}")]
    Status(u16),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    TooLarge,
    /// The caller's cancellation token fired
    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Network failures, timeouts, 5xx and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout => true,
            FetchError::Status(status) => *status >= 500 || *status == 429,
            FetchError::TooLarge | FetchError::Cancelled => false,
        }
    }
}

/// Bounded retry with linearly growing, jittered delays.
///
/// The delay before retry `n` (1-based) is `n * rand(0..backoff_step)`, so
/// concurrent fetchers hitting the same failing host spread out instead of
/// retrying in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_step: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let step_ms = self.backoff_step.as_millis() as u64;
        if step_ms == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::random::<u64>() % step_ms;
        Duration::from_millis(jitter_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Process-scoped request counter, shared by every fetcher clone it is
/// handed to.
#[derive(Debug, Clone, Default)]
pub struct RequestIds {
    next: Arc<AtomicU64>,
}

impl RequestIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Fetches upstream pages with retry, timeout and cancellation.
#[derive(Clone)]
pub struct PageFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
    timeout: Duration,
    request_ids: RequestIds,
}

impl PageFetcher {
    pub fn new(
        client: reqwest::Client,
        policy: RetryPolicy,
        timeout: Duration,
        request_ids: RequestIds,
    ) -> Self {
        Self {
            client,
            policy,
            timeout,
            request_ids,
        }
    }

    /// Builds a client that never keeps idle connections around.
    ///
    /// The catalog does not advertise keep-alive reliably, so every request
    /// also sends `Connection: close`.
    pub fn build_client(user_agent: &str) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(user_agent)
            .pool_max_idle_per_host(0)
            .build()
    }

    /// Fetches `url` and returns the body as text.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Cancelled`] as soon as `cancel` fires, including while
    ///   waiting between retries
    /// - [`FetchError::Status`] immediately for non-retryable statuses (4xx
    ///   other than 429)
    /// - the last retryable error once `max_attempts` attempts have failed
    /// - [`FetchError::TooLarge`] if the body exceeds 10MB
    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<String, FetchError> {
        let request_id = self.request_ids.next_id();
        let span = tracing::debug_span!("fetch", request_id, url = %url);
        self.fetch_with_retry(url, cancel).instrument(span).await
    }

    async fn fetch_with_retry(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let error = match self.attempt(url, cancel).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            failures += 1;
            if failures >= max_attempts {
                tracing::warn!(attempts = failures, error = %error, "Giving up after repeated failures");
                return Err(error);
            }

            let delay = self.policy.delay_for(failures);
            tracing::warn!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Request failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(&self, url: &str, cancel: &CancellationToken) -> Result<String, FetchError> {
        let request = self
            .client
            .get(url)
            .header(reqwest::header::CONNECTION, "close")
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            sent = tokio::time::timeout(self.timeout, request) => {
                sent.map_err(|_| FetchError::Timeout)?.map_err(FetchError::Network)?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            read = tokio::time::timeout(self.timeout, read_limited_bytes(response, MAX_PAGE_SIZE)) => {
                read.map_err(|_| FetchError::Timeout)??
            }
        };

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
