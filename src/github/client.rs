// GitHub REST client with status classification and payload decoding
// Author: kelexine (https://github.com/kelexine)

use super::models::ContentItem;
use crate::config::{AccessConfig, RepositoryConfig};
use crate::credentials::RateLimitInfo;
use crate::error::{AccessError, Result};
use crate::utils::logging::sanitize_if;
use crate::utils::retry::{parse_retry_after, with_retry, AttemptError};
use base64::Engine;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const GITHUB_ACCEPT: &str = "application/vnd.github+json";

/// Body and rate-limit hints of a successful response.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub body: T,
    pub rate_limit: RateLimitInfo,
}

/// Thin client over the contents, search and raw-content endpoints.
///
/// The client never picks credentials or proxies itself; callers pass the
/// token (if any) and a fully built URL, and get a typed error back.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    repository: RepositoryConfig,
    max_retries: u32,
    sanitize_logs: bool,
}

impl GitHubClient {
    /// Build a client with connection pooling for one repository.
    pub fn new(repository: &RepositoryConfig, access: &AccessConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(access.user_agent.clone())
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .use_rustls_tls()
            .build()
            .map_err(|e| AccessError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            repository: repository.clone(),
            max_retries: access.max_retries,
            sanitize_logs: true,
        })
    }

    /// Disable token redaction in logged error bodies.
    pub fn with_log_sanitizing(mut self, enabled: bool) -> Self {
        self.sanitize_logs = enabled;
        self
    }

    /// Underlying HTTP client, shared with the proxy health checks.
    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn repository(&self) -> &RepositoryConfig {
        &self.repository
    }

    /// `{api}/repos/{owner}/{name}/contents/{path}?ref={branch}`
    pub fn contents_url(&self, path: &str) -> String {
        let path = encode_path(path);
        let mut url = format!(
            "{}/repos/{}/{}/contents",
            self.repository.api_base_url.trim_end_matches('/'),
            self.repository.owner,
            self.repository.name
        );
        if !path.is_empty() {
            url.push('/');
            url.push_str(&path);
        }
        url.push_str("?ref=");
        url.push_str(&urlencoding::encode(&self.repository.default_branch));
        url
    }

    /// Code search scoped to the configured repository.
    pub fn search_url(&self, query: &str) -> String {
        let scoped = format!("{} repo:{}/{}", query.trim(), self.repository.owner, self.repository.name);
        format!(
            "{}/search/code?q={}",
            self.repository.api_base_url.trim_end_matches('/'),
            urlencoding::encode(&scoped)
        )
    }

    /// Same-origin proxy URL: `{base}?action={action}&k=v...`
    pub fn server_proxy_url(base: &str, action: &str, params: &[(&str, &str)]) -> String {
        let separator = if base.contains('?') { '&' } else { '?' };
        let mut url = format!("{}{}action={}", base, separator, urlencoding::encode(action));
        for (key, value) in params {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    /// Check that `url` answers within `timeout` with a HEAD request.
    ///
    /// Transport failures, 5xx and 429 fail the check. Any other status passes;
    /// the body fetch that follows reports it properly. Not retried.
    pub async fn validate(&self, url: &str, timeout: Duration, route: &'static str) -> Result<()> {
        let started = Instant::now();
        let response = match self.http.head(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                crate::metrics::record_network_request(route, "validation_failed", started.elapsed().as_secs_f64());
                return Err(e.into());
            }
        };

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            crate::metrics::record_network_request(route, "validation_failed", started.elapsed().as_secs_f64());
            let rate_limit = RateLimitInfo::from_headers(response.headers());
            return Err(classify_status(status, &endpoint_of(url), "", &rate_limit));
        }
        Ok(())
    }

    /// GET a body as text, retrying transient failures.
    ///
    /// `timeout` overrides the HTTP client's default for this one call.
    pub async fn get_text(
        &self,
        url: &str,
        token: Option<&str>,
        timeout: Option<Duration>,
        route: &'static str,
    ) -> Result<ApiResponse<String>> {
        let operation = format!("GET {}", endpoint_of(url));
        with_retry(&operation, self.max_retries, || self.send_once(url, token, timeout, route)).await
    }

    async fn send_once(
        &self,
        url: &str,
        token: Option<&str>,
        timeout: Option<Duration>,
        route: &'static str,
    ) -> std::result::Result<ApiResponse<String>, AttemptError> {
        let started = Instant::now();
        let mut request = self.http.get(url).header(header::ACCEPT, GITHUB_ACCEPT);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                crate::metrics::record_network_request(route, "network_error", started.elapsed().as_secs_f64());
                debug!(route, error = %e, "Transport failure");
                return Err(AccessError::from(e).into());
            }
        };

        let status = response.status();
        let rate_limit = RateLimitInfo::from_headers(response.headers());
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let text = response.text().await.map_err(AccessError::from)?;
        let elapsed = started.elapsed().as_secs_f64();

        if status.is_success() {
            crate::metrics::record_network_request(route, "success", elapsed);
            return Ok(ApiResponse {
                body: text,
                rate_limit,
            });
        }

        let error = classify_status(status, &endpoint_of(url), &text, &rate_limit);
        crate::metrics::record_network_request(route, error.kind(), elapsed);
        warn!(
            route,
            status = status.as_u16(),
            body = %sanitize_if(self.sanitize_logs, truncate(&text, 200)),
            "Remote call failed"
        );
        Err(AttemptError { error, retry_after })
    }
}

/// Map a non-2xx response onto the error taxonomy.
///
/// 401/403 with an empty rate-limit window and every 429 are rate-limit
/// errors; other 401s mean the credential was rejected.
pub fn classify_status(status: StatusCode, endpoint: &str, body: &str, rate_limit: &RateLimitInfo) -> AccessError {
    let code = status.as_u16();
    let message = extract_error_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    });
    let rate_limited = code == 429
        || (matches!(code, 401 | 403)
            && (rate_limit.is_exhausted() || message.to_lowercase().contains("rate limit")));

    if rate_limited {
        AccessError::RateLimit {
            status: code,
            endpoint: endpoint.to_string(),
            method: "GET".to_string(),
            remaining: rate_limit.remaining,
            reset_at: rate_limit.reset_at,
        }
    } else if code == 401 {
        AccessError::Auth {
            status: code,
            endpoint: endpoint.to_string(),
            message,
        }
    } else {
        AccessError::Api {
            status: code,
            endpoint: endpoint.to_string(),
            method: "GET".to_string(),
            message,
        }
    }
}

/// Contents responses are a list for directories and an object for a file.
pub fn normalize_listing(value: Value) -> Result<Vec<ContentItem>> {
    match value {
        Value::Array(_) => Ok(serde_json::from_value(value)?),
        Value::Object(_) => Ok(vec![serde_json::from_value(value)?]),
        other => Err(AccessError::Validation(format!(
            "expected a listing, got {}",
            json_kind(&other)
        ))),
    }
}

/// Decode a contents-API JSON payload with `encoding: "base64"`.
/// Any other body is returned unchanged.
pub fn decode_file_payload(body: String) -> Result<String> {
    let trimmed = body.trim_start();
    if !trimmed.starts_with('{') {
        return Ok(body);
    }
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) else {
        return Ok(body);
    };
    let encoding = map.get("encoding").and_then(Value::as_str);
    let content = map.get("content").and_then(Value::as_str);

    match (encoding, content) {
        (Some("base64"), Some(content)) => {
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| AccessError::FileOperation(format!("invalid base64 payload: {}", e)))?;
            String::from_utf8(bytes)
                .map_err(|e| AccessError::FileOperation(format!("file is not valid UTF-8: {}", e)))
        }
        _ => Ok(body),
    }
}

/// Extract the `message` field from a GitHub error body.
fn extract_error_message(body: &str) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct ErrorResponse {
        message: Option<String>,
    }

    serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|e| e.message)
        .filter(|m| !m.is_empty())
}

/// URL without its query string, used in error and log context.
fn endpoint_of(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GitHubClient {
        let repository = RepositoryConfig {
            owner: "octo".to_string(),
            name: "repo".to_string(),
            default_branch: "main".to_string(),
            api_base_url: "https://api.github.com/".to_string(),
        };
        GitHubClient::new(&repository, &AccessConfig::default()).unwrap()
    }

    #[test]
    fn test_contents_url() {
        let client = client();
        assert_eq!(
            client.contents_url("/docs/getting started"),
            "https://api.github.com/repos/octo/repo/contents/docs/getting%20started?ref=main"
        );
        assert_eq!(
            client.contents_url(""),
            "https://api.github.com/repos/octo/repo/contents?ref=main"
        );
    }

    #[test]
    fn test_search_url_is_scoped() {
        let url = client().search_url("fn main");
        assert!(url.starts_with("https://api.github.com/search/code?q="));
        assert!(url.contains("repo%3Aocto%2Frepo"));
    }

    #[test]
    fn test_server_proxy_url() {
        let url = GitHubClient::server_proxy_url("https://app.example/api/github", "getContents", &[("path", "src/a b")]);
        assert_eq!(url, "https://app.example/api/github?action=getContents&path=src%2Fa%20b");
    }

    #[test]
    fn test_classify_status() {
        let exhausted = RateLimitInfo {
            remaining: Some(0),
            reset_at: Some(1_700_000_000),
            retry_after: None,
        };
        let err = classify_status(StatusCode::FORBIDDEN, "/x", "{}", &exhausted);
        assert!(matches!(err, AccessError::RateLimit { remaining: Some(0), .. }));

        let err = classify_status(StatusCode::UNAUTHORIZED, "/x", r#"{"message":"Bad credentials"}"#, &RateLimitInfo::default());
        assert!(matches!(err, AccessError::Auth { ref message, .. } if message == "Bad credentials"));

        let err = classify_status(StatusCode::FORBIDDEN, "/x", r#"{"message":"Resource not accessible"}"#, &RateLimitInfo::default());
        assert!(matches!(err, AccessError::Api { status: 403, .. }));

        let err = classify_status(StatusCode::NOT_FOUND, "/x", "", &RateLimitInfo::default());
        assert!(matches!(err, AccessError::Api { status: 404, ref message, .. } if message == "Not Found"));
    }

    #[test]
    fn test_normalize_single_object() {
        let value = serde_json::json!({"name": "README.md", "path": "README.md", "type": "file", "size": 10});
        let items = normalize_listing(value).unwrap();
        assert_eq!(items.len(), 1);
        assert!(normalize_listing(serde_json::json!("nope")).is_err());
    }

    #[test]
    fn test_decode_base64_payload() {
        let body = r#"{"encoding":"base64","content":"aGVsbG8g\nd29ybGQ="}"#.to_string();
        assert_eq!(decode_file_payload(body).unwrap(), "hello world");

        let plain = "plain text".to_string();
        assert_eq!(decode_file_payload(plain).unwrap(), "plain text");

        let json = r#"{"name":"not a payload"}"#.to_string();
        assert_eq!(decode_file_payload(json.clone()).unwrap(), json);

        let broken = r#"{"encoding":"base64","content":"!!!"}"#.to_string();
        assert!(matches!(decode_file_payload(broken), Err(AccessError::FileOperation(_))));
    }
}
