//! Structured logging and token redaction.
//!
//! This module configures the `tracing` ecosystem for the application and
//! keeps GitHub API tokens out of logged messages.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::config::LoggingConfig;
use crate::error::{AccessError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber for the application.
///
/// Supports two output formats:
/// - `json`: Structured JSON logs for production ingestion.
/// - `pretty` (default): Human-readable, colorized output for development.
///
/// Log levels are controlled via the `RUST_LOG` environment variable or
/// the provided `LoggingConfig`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);
    let outcome = match config.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };

    outcome.map_err(|e| AccessError::Internal(format!("logging already initialized: {}", e)))
}

// Classic tokens (ghp_, gho_, ghu_, ghs_, ghr_) and fine-grained github_pat_ tokens
static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:gh[pousr]_[A-Za-z0-9]{16,}|github_pat_[A-Za-z0-9_]{22,})")
        .expect("token pattern is a valid regex")
});

/// Replaces every GitHub API token in `input` with `[REDACTED_TOKEN]`.
///
/// Used on remote error bodies and URLs before they reach a log sink.
pub fn sanitize(input: &str) -> String {
    TOKEN_PATTERN.replace_all(input, "[REDACTED_TOKEN]").into_owned()
}

/// Applies [`sanitize`] only when the configuration asks for it.
pub fn sanitize_if(enabled: bool, input: &str) -> String {
    if enabled {
        sanitize(input)
    } else {
        input.to_string()
    }
}
