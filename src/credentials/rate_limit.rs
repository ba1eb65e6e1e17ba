//! Rate-limit header parsing.
//!
//! Reads `X-RateLimit-Remaining` / `X-RateLimit-Reset` (or the standardised
//! `RateLimit-Remaining` / `RateLimit-Reset`) and `Retry-After` from API
//! responses so the rotator can decide when a credential is usable again.

// Author: kelexine (https://github.com/kelexine)

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use std::time::Duration;

/// Rate-limit hints extracted from one response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Remaining calls in the current window.
    pub remaining: Option<u64>,
    /// Unix timestamp (seconds) at which the window resets.
    pub reset_at: Option<i64>,
    /// Server-requested wait before the next attempt.
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    /// Parse rate-limit headers. Missing or malformed headers yield `None` fields.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let remaining = header_value(headers, &["x-ratelimit-remaining", "ratelimit-remaining"])
            .and_then(|v| v.parse::<u64>().ok());

        let reset_at = header_value(headers, &["x-ratelimit-reset", "ratelimit-reset"])
            .and_then(|v| v.parse::<i64>().ok());

        let retry_after = header_value(headers, &["retry-after"])
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        Self {
            remaining,
            reset_at,
            retry_after,
        }
    }

    /// The window is known to be used up.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Reset time as a timestamp, if the server sent one.
    pub fn reset_time(&self) -> Option<DateTime<Utc>> {
        self.reset_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }
}

fn header_value<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}
