//! Retry and Error Recovery
//!
//! Wraps model provider calls with exponential backoff. Only transient
//! failures are retried: HTTP 429, 5xx and network errors. Authentication
//! and quota errors fail the turn on the first attempt.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Configuration for retry behavior (`[agent.retry]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (default 3).
    pub max_retries: u32,
    /// Base delay in milliseconds (default 1000).
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (default 30000).
    pub max_delay_ms: u64,
    /// Backoff multiplier (default 2.0).
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let clamped = delay_ms.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(clamped)
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Whether an error is transient and should be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// HTTP 429. May include a Retry-After hint.
    RateLimit { retry_after: Option<Duration> },
    /// HTTP 500, 502, 503, 504.
    ServerError,
    /// Timeout or connection failure.
    NetworkError,
    /// Anything else (auth failure, bad request, quota exhausted).
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::Fatal)
    }
}

/// Non-success HTTP response from a model endpoint.
#[derive(Debug, Error)]
#[error("HTTP {status}: {body}")]
pub struct HttpStatusError {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: String,
}

/// Classify an error from an HTTP status code.
pub fn classify_http_error(status: u16, retry_after_header: Option<&str>) -> ErrorKind {
    match status {
        429 => {
            let retry_after =
                retry_after_header.and_then(|h| h.trim().parse::<u64>().ok().map(Duration::from_secs));
            ErrorKind::RateLimit { retry_after }
        }
        408 => ErrorKind::NetworkError,
        500 | 502 | 503 | 504 => ErrorKind::ServerError,
        _ => ErrorKind::Fatal,
    }
}

/// Classify an `anyhow` error produced by a provider call.
pub fn classify_error(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(http) = cause.downcast_ref::<HttpStatusError>() {
            return classify_http_error(http.status, http.retry_after.as_deref());
        }
        if let Some(req) = cause.downcast_ref::<reqwest::Error>() {
            if req.is_timeout() || req.is_connect() || req.is_request() {
                return ErrorKind::NetworkError;
            }
            if let Some(status) = req.status() {
                return classify_http_error(status.as_u16(), None);
            }
        }
    }
    ErrorKind::Fatal
}

// ---------------------------------------------------------------------------
// Retry executor
// ---------------------------------------------------------------------------

/// Execute an async operation, retrying while `classify` says the error is
/// transient and attempts remain.
pub async fn with_retry<F, Fut, T, C>(
    policy: &RetryPolicy,
    operation_name: &str,
    classify: C,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    C: Fn(&anyhow::Error) -> ErrorKind,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                let kind = classify(&err);
                if !kind.is_retryable() {
                    return Err(err);
                }
                if attempt >= policy.max_retries {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "max retries exceeded"
                    );
                    return Err(err);
                }

                let delay = match kind {
                    ErrorKind::RateLimit {
                        retry_after: Some(hint),
                    } => hint.min(Duration::from_millis(policy.max_delay_ms)),
                    _ => policy.delay_for_attempt(attempt),
                };
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    err = %err,
                    "retrying after error"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn delay_exponential_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(8000));
    }

    #[test]
    fn delay_clamped_to_max() {
        let policy = RetryPolicy {
            base_delay_ms: 10000,
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(30000));
    }

    #[test]
    fn classify_statuses() {
        assert_eq!(
            classify_http_error(429, Some("5")),
            ErrorKind::RateLimit {
                retry_after: Some(Duration::from_secs(5))
            }
        );
        assert_eq!(classify_http_error(503, None), ErrorKind::ServerError);
        assert_eq!(classify_http_error(401, None), ErrorKind::Fatal);
        assert_eq!(classify_http_error(404, None), ErrorKind::Fatal);
    }

    #[test]
    fn classify_through_context() {
        let err = anyhow::Error::new(HttpStatusError {
            status: 502,
            retry_after: None,
            body: "bad gateway".into(),
        })
        .context("chat completion failed");
        assert_eq!(classify_error(&err), ErrorKind::ServerError);
        assert_eq!(classify_error(&anyhow::anyhow!("boom")), ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry(&fast(), "test", |_| ErrorKind::ServerError, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow::anyhow!("transient"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<i32> = with_retry(&fast(), "test", |_| ErrorKind::Fatal, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("401 unauthorized")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_exhausted() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..fast()
        };
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<i32> = with_retry(&policy, "test", |_| ErrorKind::NetworkError, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("connection reset")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
