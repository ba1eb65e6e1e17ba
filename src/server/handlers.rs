// HTTP request handlers
// Author: kelexine (https://github.com/kelexine)

use super::routes::AppState;
use crate::error::{AccessError, Result};
use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Query string of `/api/github`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiQuery {
    pub action: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub force: Option<bool>,
}

/// Non-secret configuration returned by `action=getConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicConfig {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub index_branch: String,
    pub manifest_path: String,
    pub index_base_path: String,
    pub has_credentials: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HashMap<String, HealthCheck>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: String,
}

/// Handler for `/api/github?action=getContents|getFileContent|search|getIndex|getConfig`
pub async fn api_handler(State(state): State<AppState>, Query(query): Query<ApiQuery>) -> Result<Response> {
    debug!(action = %query.action, "Proxy request");

    match query.action.as_str() {
        "getContents" => {
            let path = query.path.unwrap_or_default();
            let items = state.service.get_contents(&path).await?;
            Ok(Json(items.as_slice()).into_response())
        }
        "getFileContent" => {
            let url = require(query.url, "url")?;
            ensure_allowed_url(&state, &url)?;
            let text = state.service.get_file_content(&url).await?;
            Ok((
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                text.as_str().to_owned(),
            )
                .into_response())
        }
        "search" => {
            let q = require(query.q, "q")?;
            let results = state.service.search_code(&q).await?;
            Ok(Json(results.as_ref()).into_response())
        }
        "getIndex" => {
            let force = query.force.unwrap_or(false);
            let index = match query.branch.filter(|b| !b.trim().is_empty()) {
                Some(branch) => state.search.get_index_for(&branch, force).await?,
                None => state.search.get_index(force).await?,
            };
            Ok(Json(index.as_ref()).into_response())
        }
        "getConfig" => {
            let config = &state.config;
            Ok(Json(PublicConfig {
                owner: config.repository.owner.clone(),
                name: config.repository.name.clone(),
                default_branch: config.repository.default_branch.clone(),
                index_branch: config.search_index.index_branch.clone(),
                manifest_path: config.search_index.manifest_path.clone(),
                index_base_path: config.search_index.base_path.clone(),
                has_credentials: state.service.rotator().has_credentials(),
            })
            .into_response())
        }
        other => Err(AccessError::Validation(format!("unsupported action '{}'", other))),
    }
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut checks = HashMap::new();
    let mut degraded = 0;

    // Check credential pool
    let rotator = state.service.rotator();
    let (total, available) = (rotator.count(), rotator.available_count());
    let credential_check = if total == 0 {
        HealthCheck {
            status: "ok".to_string(),
            message: "No credentials configured; unauthenticated access".to_string(),
        }
    } else if available == 0 {
        degraded += 1;
        HealthCheck {
            status: "warning".to_string(),
            message: format!("All {} credentials exhausted", total),
        }
    } else {
        HealthCheck {
            status: "ok".to_string(),
            message: format!("{}/{} credentials available", available, total),
        }
    };
    checks.insert("credentials".to_string(), credential_check);

    // Check intermediaries
    let proxies = state.service.proxies().health_stats();
    let healthy = proxies.iter().filter(|p| p.is_healthy).count();
    let proxy_check = if proxies.is_empty() {
        HealthCheck {
            status: "ok".to_string(),
            message: "No proxies configured".to_string(),
        }
    } else if healthy == 0 {
        degraded += 1;
        HealthCheck {
            status: "warning".to_string(),
            message: format!("All {} proxies unhealthy", proxies.len()),
        }
    } else {
        HealthCheck {
            status: "ok".to_string(),
            message: format!("{}/{} proxies healthy", healthy, proxies.len()),
        }
    };
    checks.insert("proxies".to_string(), proxy_check);

    // Check configuration
    checks.insert(
        "configuration".to_string(),
        HealthCheck {
            status: "ok".to_string(),
            message: format!(
                "{}/{} via {}",
                state.config.repository.owner,
                state.config.repository.name,
                state.service.policy().as_str()
            ),
        },
    );

    let status = match degraded {
        0 => HealthStatus::Healthy,
        1 => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    };

    Json(HealthResponse {
        status,
        checks,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Prometheus text exposition
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::gather_metrics(),
    )
}

fn require(value: Option<String>, name: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AccessError::Validation(format!("missing query parameter '{}'", name)))
}

/// Only the configured API host and raw content hosts may be fetched through
/// the proxy endpoint.
fn ensure_allowed_url(state: &AppState, url: &str) -> Result<()> {
    let config = &state.config;
    let allowed = [
        config.repository.api_base_url.as_str(),
        config.search_index.raw_base_url.as_str(),
        "https://raw.githubusercontent.com",
    ];
    let permitted = allowed.iter().any(|base| {
        let base = base.trim_end_matches('/');
        url.strip_prefix(base)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
    });

    if permitted {
        Ok(())
    } else {
        Err(AccessError::Validation(format!("url '{}' is not an allowed source", url)))
    }
}
