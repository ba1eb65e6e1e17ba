// Retry logic with Retry-After hint support
// Author: kelexine (https://github.com/kelexine)

use crate::error::{AccessError, Result};
use backoff::{backoff::Backoff, ExponentialBackoff};
use std::time::Duration;
use tracing::debug;

/// Longest server-requested wait honored between attempts.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// A failed attempt plus the server's requested wait, if any.
#[derive(Debug, Clone)]
pub struct AttemptError {
    pub error: AccessError,
    pub retry_after: Option<Duration>,
}

impl From<AccessError> for AttemptError {
    fn from(error: AccessError) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

/// Parse a `Retry-After` value given in seconds (e.g. "40", "1.5").
/// Returns the duration capped at 60 seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let millis = (seconds.min(MAX_RETRY_AFTER.as_secs_f64()) * 1000.0) as u64;
    Some(Duration::from_millis(millis))
}

/// Create exponential backoff configuration for retries
pub fn create_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: Duration::from_millis(250),
        initial_interval: Duration::from_millis(250),
        randomization_factor: 0.3,
        multiplier: 2.0,
        max_interval: Duration::from_secs(10),
        max_elapsed_time: Some(Duration::from_secs(60)),
        ..Default::default()
    }
}

/// Determine if an HTTP status code is retryable by this helper.
///
/// 429 is left out: rate limits are handled by rotating credentials.
pub fn is_retryable(status: u16) -> bool {
    matches!(status, 500 | 502 | 503 | 504)
}

/// Execute `operation`, retrying transient failures up to `max_retries` extra times.
/// - Uses the server's Retry-After hint if one was sent
/// - Falls back to exponential backoff
/// - Never retries 4xx responses
pub async fn with_retry<F, Fut, T>(operation_name: &str, max_retries: u32, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, AttemptError>>,
{
    let mut backoff = create_backoff();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(AttemptError { error, retry_after }) => {
                if !error.is_transient() || attempt > max_retries {
                    return Err(error);
                }

                let delay = match retry_after {
                    Some(hint) => hint.min(MAX_RETRY_AFTER),
                    None => backoff.next_backoff().unwrap_or(Duration::from_secs(10)),
                };
                debug!(
                    "{} failed with {} (attempt {}), retrying after {}ms",
                    operation_name,
                    error.kind(),
                    attempt,
                    delay.as_millis()
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}
