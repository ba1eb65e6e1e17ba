// Error types for repolens
// Author: kelexine (https://github.com/kelexine)

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Every failure surfaced by the content-access layer.
///
/// The type is `Clone` because a single underlying call may be shared by any
/// number of coalesced waiters, each of which receives its own copy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccessError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {method} {endpoint} returned HTTP {status}: {message}")]
    Api {
        status: u16,
        endpoint: String,
        method: String,
        message: String,
    },

    #[error("Rate limit exceeded: {method} {endpoint} returned HTTP {status} (remaining: {remaining:?}, reset at: {reset_at:?})")]
    RateLimit {
        status: u16,
        endpoint: String,
        method: String,
        remaining: Option<u64>,
        reset_at: Option<i64>,
    },

    #[error("Authentication failed: {endpoint} returned HTTP {status}: {message}")]
    Auth {
        status: u16,
        endpoint: String,
        message: String,
    },

    #[error("File operation failed: {0}")]
    FileOperation(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No search index for branch '{branch}'")]
    NoIndexForBranch { branch: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request aborted")]
    Aborted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AccessError {
    /// Stable, machine-readable error kind used in metrics labels and JSON bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AccessError::Network(_) => "network_error",
            AccessError::Api { .. } => "api_error",
            AccessError::RateLimit { .. } => "rate_limit_error",
            AccessError::Auth { .. } => "authentication_error",
            AccessError::FileOperation(_) => "file_operation_error",
            AccessError::Validation(_) | AccessError::NoIndexForBranch { .. } => "validation_error",
            AccessError::Config(_) => "configuration_error",
            AccessError::Aborted => "aborted",
            AccessError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status carried by the error, if it came from a remote response.
    pub fn status(&self) -> Option<u16> {
        match self {
            AccessError::Api { status, .. }
            | AccessError::RateLimit { status, .. }
            | AccessError::Auth { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, AccessError::RateLimit { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, AccessError::Auth { .. })
    }

    /// Whether rotating to another credential may help.
    pub fn is_credential_failure(&self) -> bool {
        self.is_rate_limit() || self.is_auth()
    }

    /// Transport failures and 5xx responses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            AccessError::Network(_) => true,
            AccessError::Api { status, .. } => crate::utils::retry::is_retryable(*status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AccessError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AccessError::Network(format!("request timed out: {}", err))
        } else if err.is_decode() {
            AccessError::Validation(format!("response decoding failed: {}", err))
        } else {
            AccessError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AccessError {
    fn from(err: serde_json::Error) -> Self {
        AccessError::Validation(format!("malformed JSON: {}", err))
    }
}

impl From<config::ConfigError> for AccessError {
    fn from(err: config::ConfigError) -> Self {
        AccessError::Config(err.to_string())
    }
}

// Convert AccessError to HTTP responses for the server-side proxy endpoint
impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let status = match &self {
            AccessError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            AccessError::Auth { .. } => StatusCode::UNAUTHORIZED,
            AccessError::Api { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AccessError::Network(_) => StatusCode::BAD_GATEWAY,
            AccessError::NoIndexForBranch { .. } => StatusCode::NOT_FOUND,
            AccessError::Validation(_) => StatusCode::BAD_REQUEST,
            AccessError::Aborted => StatusCode::REQUEST_TIMEOUT,
            AccessError::FileOperation(_) | AccessError::Config(_) | AccessError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = json!({
            "type": "error",
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AccessError>;
