//! Content access facade.
//!
//! [`ContentService`] is the entry point the rest of the application uses to
//! list directories, read files and search. For every call it decides
//! whether to answer from cache, join a call already in flight, or go to the
//! network, and if so with which credential or intermediary.
//!
//! Routing is fixed at construction by an [`AccessPolicy`]:
//! - `DirectWithCredential`: the next credential from the rotator is attached.
//!   On a rate-limit or auth failure the credential is reported and the call is
//!   retried once with the next one. When no credential is left the call falls
//!   back to the server proxy if configured, otherwise goes out unauthenticated.
//! - `DirectUnauthenticated`: plain direct calls.
//! - `ServerProxied`: listings and searches go to the same-origin server proxy;
//!   file reads try the configured intermediaries in health order, each with a
//!   short validation timeout, then the server proxy.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod policy;
pub mod prefetch;
mod signal;

pub use policy::AccessPolicy;
pub use signal::AbortSignal;

use crate::cache::{AdaptiveCache, CacheStats};
use crate::config::{AppConfig, PrefetchConfig};
use crate::coordinator::{CoordinatorStats, EnqueueOptions, Priority, RequestCoordinator};
use crate::credentials::{CredentialRotator, CredentialStatus, RateLimitInfo};
use crate::error::{AccessError, Result};
use crate::github::{decode_file_payload, normalize_listing, ContentItem, GitHubClient, SearchResults};
use crate::proxy::{ProxyHealth, ProxyHealthManager};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const ROUTE_DIRECT: &str = "direct";
const ROUTE_CREDENTIAL: &str = "credential";
const ROUTE_SERVER: &str = "server";
const ROUTE_PROXY: &str = "proxy";

/// A credential failure is retried once with the next credential.
const CREDENTIAL_ATTEMPTS: usize = 2;

/// A cached directory listing tagged with its freshness version.
#[derive(Debug, Clone)]
pub struct CachedListing {
    pub items: Arc<Vec<ContentItem>>,
    pub version: String,
    pub fetched_at: DateTime<Utc>,
}

/// Statistics of both content caches.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceCacheStats {
    pub contents: CacheStats,
    pub files: CacheStats,
}

/// Coalescing counters per coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorSummary {
    pub contents: CoordinatorStats,
    pub files: CoordinatorStats,
    pub search: CoordinatorStats,
}

/// Routing state: policy, credential pool and intermediaries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    pub policy: AccessPolicy,
    pub credentials_total: usize,
    pub credentials_available: usize,
    pub credentials: Vec<CredentialStatus>,
    pub proxies: Vec<ProxyHealth>,
    pub server_proxy: Option<String>,
    pub coordinators: CoordinatorSummary,
}

struct Inner {
    client: GitHubClient,
    policy: AccessPolicy,
    server_proxy_url: Option<String>,
    validation_timeout: Duration,
    rotator: Arc<CredentialRotator>,
    proxies: Arc<ProxyHealthManager>,
    contents: AdaptiveCache<String, CachedListing>,
    files: AdaptiveCache<String, Arc<String>>,
    listings: RequestCoordinator<Arc<Vec<ContentItem>>>,
    file_reads: RequestCoordinator<Arc<String>>,
    searches: RequestCoordinator<Arc<SearchResults>>,
    prefetch: PrefetchConfig,
    /// Bumped by `clear_cache`; calls started under an older generation do not populate the caches.
    generation: AtomicU64,
}

/// Content access facade. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ContentService {
    inner: Arc<Inner>,
}

impl ContentService {
    /// Build a service with its own rotator and proxy manager from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let rotator = Arc::new(CredentialRotator::new(
            config.credentials.tokens.iter().cloned(),
            config.credentials.exhausted_cooldown_secs,
        ));
        let proxies = Arc::new(ProxyHealthManager::new(config.proxies.clone()));
        let policy = AccessPolicy::from_config(&config.access, rotator.has_credentials());
        Self::new(config, policy, rotator, proxies)
    }

    /// Build a service around injected collaborators.
    pub fn new(
        config: &AppConfig,
        policy: AccessPolicy,
        rotator: Arc<CredentialRotator>,
        proxies: Arc<ProxyHealthManager>,
    ) -> Result<Self> {
        let client = GitHubClient::new(&config.repository, &config.access)?
            .with_log_sanitizing(config.logging.sanitize_tokens);

        info!(
            policy = policy.as_str(),
            credentials = rotator.count(),
            proxies = proxies.len(),
            "Content service ready for {}/{}",
            config.repository.owner,
            config.repository.name
        );

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                policy,
                server_proxy_url: config.access.server_proxy_url.clone(),
                validation_timeout: Duration::from_secs(config.access.validation_timeout_secs.max(1)),
                rotator,
                proxies,
                contents: AdaptiveCache::new("contents", config.cache.contents.clone()),
                files: AdaptiveCache::new("files", config.cache.files.clone()),
                listings: RequestCoordinator::new("contents", config.coordinator.clone()),
                file_reads: RequestCoordinator::new("files", config.coordinator.clone()),
                searches: RequestCoordinator::new("search", config.coordinator.clone()),
                prefetch: config.prefetch.clone(),
                generation: AtomicU64::new(0),
            }),
        })
    }

    pub fn policy(&self) -> AccessPolicy {
        self.inner.policy
    }

    pub fn client(&self) -> &GitHubClient {
        &self.inner.client
    }

    pub fn proxies(&self) -> &Arc<ProxyHealthManager> {
        &self.inner.proxies
    }

    pub fn rotator(&self) -> &Arc<CredentialRotator> {
        &self.inner.rotator
    }

    /// List a directory.
    pub async fn get_contents(&self, path: &str) -> Result<Arc<Vec<ContentItem>>> {
        self.get_contents_with_signal(path, &AbortSignal::new()).await
    }

    /// List a directory, giving up with [`AccessError::Aborted`] when `signal` fires.
    ///
    /// A cache hit returns at once and starts a background prefetch of related
    /// items. An aborted call leaves the cache untouched and is not counted
    /// against any credential or proxy.
    pub async fn get_contents_with_signal(&self, path: &str, signal: &AbortSignal) -> Result<Arc<Vec<ContentItem>>> {
        if signal.is_aborted() {
            return Err(AccessError::Aborted);
        }

        let path = normalize_path(path);
        let key = contents_key(&path);
        if let Some(cached) = self.inner.contents.get(&key) {
            debug!(path = %path, version = %cached.version, "Listing served from cache");
            self.spawn_prefetch(cached.items.clone());
            return Ok(cached.items);
        }

        abortable(signal, self.fetch_listing(path, key, Priority::High)).await
    }

    /// Read a file by URL (raw download URL or contents API URL).
    pub async fn get_file_content(&self, url: &str) -> Result<Arc<String>> {
        self.get_file_content_with_signal(url, &AbortSignal::new()).await
    }

    pub async fn get_file_content_with_signal(&self, url: &str, signal: &AbortSignal) -> Result<Arc<String>> {
        if signal.is_aborted() {
            return Err(AccessError::Aborted);
        }
        abortable(signal, self.fetch_file(url.to_string(), Priority::High)).await
    }

    /// Code search in the configured repository. Concurrent identical queries share one call.
    pub async fn search_code(&self, query: &str) -> Result<Arc<SearchResults>> {
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err(AccessError::Validation("search query is empty".to_string()));
        }

        let inner = self.inner.clone();
        let key = format!("search:{}", query);
        self.inner
            .searches
            .enqueue(key, EnqueueOptions::default(), move || async move {
                let direct = inner.client.search_url(&query);
                let server = inner.server_url("search", &[("q", &query)]);
                let body = inner.fetch_text(&direct, server, false).await?;
                let results: SearchResults = serde_json::from_str(&body)?;
                Ok(Arc::new(results))
            })
            .await
    }

    /// Prefetch directories and small files related to `items`.
    ///
    /// Best effort: failures are logged and swallowed. Returns how many
    /// selected items are now cached.
    pub async fn prefetch_related(&self, items: &[ContentItem]) -> usize {
        if !self.inner.prefetch.enabled {
            return 0;
        }

        let dirs: Vec<String> = prefetch::select_directories(items, &self.inner.prefetch)
            .into_iter()
            .map(|item| normalize_path(&item.path))
            .collect();
        let files: Vec<String> = prefetch::select_files(items, &self.inner.prefetch)
            .into_iter()
            .filter_map(|item| item.download_url.clone())
            .collect();

        let dir_jobs = dirs.into_iter().map(|path| {
            let this = self.clone();
            async move {
                let key = contents_key(&path);
                if this.inner.contents.has(&key) {
                    return true;
                }
                let outcome = this.fetch_listing(path.clone(), key, Priority::Low).await;
                if let Err(e) = &outcome {
                    debug!(path = %path, "Directory prefetch failed: {}", e);
                }
                crate::metrics::record_prefetch("directory", outcome.is_ok());
                outcome.is_ok()
            }
        });
        let file_jobs = files.into_iter().map(|url| {
            let this = self.clone();
            async move {
                if this.inner.files.has(&file_key(&url)) {
                    return true;
                }
                let outcome = this.fetch_file(url.clone(), Priority::Low).await;
                if let Err(e) = &outcome {
                    debug!(url = %url, "File prefetch failed: {}", e);
                }
                crate::metrics::record_prefetch("file", outcome.is_ok());
                outcome.is_ok()
            }
        });

        let (dirs_done, files_done) = futures::future::join(
            futures::future::join_all(dir_jobs),
            futures::future::join_all(file_jobs),
        )
        .await;

        dirs_done
            .into_iter()
            .chain(files_done)
            .filter(|ok| *ok)
            .count()
    }

    /// Drop cached listings and files, forget in-flight calls and reset proxy
    /// failure counters. Calls still running finish for their callers but
    /// their results are not cached.
    pub fn clear_cache(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.contents.clear();
        self.inner.files.clear();
        self.inner.listings.clear();
        self.inner.file_reads.clear();
        self.inner.searches.clear();
        self.inner.proxies.reset();
        info!("Content caches cleared");
    }

    pub fn cache_stats(&self) -> ServiceCacheStats {
        ServiceCacheStats {
            contents: self.inner.contents.stats(),
            files: self.inner.files.stats(),
        }
    }

    pub fn network_stats(&self) -> NetworkStats {
        NetworkStats {
            policy: self.inner.policy,
            credentials_total: self.inner.rotator.count(),
            credentials_available: self.inner.rotator.available_count(),
            credentials: self.inner.rotator.statuses(),
            proxies: self.inner.proxies.health_stats(),
            server_proxy: self.inner.server_proxy_url.clone(),
            coordinators: CoordinatorSummary {
                contents: self.inner.listings.stats(),
                files: self.inner.file_reads.stats(),
                search: self.inner.searches.stats(),
            },
        }
    }

    /// Freshness version of the cached listing for `path`, if any.
    pub fn contents_version(&self, path: &str) -> Option<String> {
        self.inner
            .contents
            .peek(&contents_key(&normalize_path(path)))
            .map(|cached| cached.version)
    }

    async fn fetch_listing(&self, path: String, key: String, priority: Priority) -> Result<Arc<Vec<ContentItem>>> {
        let inner = self.inner.clone();
        let cache_key = key.clone();
        let generation = self.inner.generation.load(Ordering::Acquire);
        self.inner
            .listings
            .enqueue(key, EnqueueOptions::with_priority(priority), move || async move {
                let direct = inner.client.contents_url(&path);
                let server = inner.server_url("getContents", &[("path", &path)]);
                let body = inner.fetch_text(&direct, server, false).await?;
                let items = Arc::new(normalize_listing(serde_json::from_str(&body)?)?);

                let fetched_at = Utc::now();
                let version = freshness_version(&items, fetched_at);
                debug!(path = %path, entries = items.len(), version = %version, "Listing fetched");
                if inner.is_current(generation) {
                    inner.contents.set(
                        cache_key,
                        CachedListing {
                            items: items.clone(),
                            version,
                            fetched_at,
                        },
                    );
                } else {
                    debug!(path = %path, "Cache cleared during fetch; listing not cached");
                }
                Ok(items)
            })
            .await
    }

    async fn fetch_file(&self, url: String, priority: Priority) -> Result<Arc<String>> {
        let key = file_key(&url);
        if let Some(hit) = self.inner.files.get(&key) {
            return Ok(hit);
        }

        let inner = self.inner.clone();
        let cache_key = key.clone();
        let generation = self.inner.generation.load(Ordering::Acquire);
        self.inner
            .file_reads
            .enqueue(key, EnqueueOptions::with_priority(priority), move || async move {
                let server = inner.server_url("getFileContent", &[("url", &url)]);
                let body = inner.fetch_text(&url, server, true).await?;
                let text = Arc::new(decode_file_payload(body)?);
                if inner.is_current(generation) {
                    inner.files.set(cache_key, text.clone());
                }
                Ok(text)
            })
            .await
    }

    fn spawn_prefetch(&self, items: Arc<Vec<ContentItem>>) {
        if !self.inner.prefetch.enabled || items.is_empty() {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let warmed = this.prefetch_related(&items).await;
            debug!(warmed, "Prefetch finished");
        });
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn server_url(&self, action: &str, params: &[(&str, &str)]) -> Option<String> {
        self.server_proxy_url
            .as_deref()
            .map(|base| GitHubClient::server_proxy_url(base, action, params))
    }

    /// Fetch `direct_url` according to the access policy.
    ///
    /// `proxies_first` makes server-proxied calls try the intermediaries before
    /// the server proxy (used for file reads).
    async fn fetch_text(&self, direct_url: &str, server_url: Option<String>, proxies_first: bool) -> Result<String> {
        match self.policy {
            AccessPolicy::ServerProxied => self.fetch_proxied(direct_url, server_url, proxies_first).await,
            AccessPolicy::DirectWithCredential => self.fetch_with_credentials(direct_url, server_url).await,
            AccessPolicy::DirectUnauthenticated => self.get(direct_url, None, ROUTE_DIRECT).await,
        }
    }

    async fn get(&self, url: &str, token: Option<&str>, route: &'static str) -> Result<String> {
        self.client.get_text(url, token, None, route).await.map(|r| r.body)
    }

    async fn fetch_with_credentials(&self, url: &str, server_url: Option<String>) -> Result<String> {
        let mut last_error = None;

        for _ in 0..CREDENTIAL_ATTEMPTS {
            let Some(credential) = self.rotator.next() else {
                break;
            };
            match self.client.get_text(url, Some(credential.token()), None, ROUTE_CREDENTIAL).await {
                Ok(response) => {
                    self.rotator.report_success(&credential, &response.rate_limit);
                    return Ok(response.body);
                }
                Err(err) if err.is_credential_failure() => {
                    let status = err.status().unwrap_or(0);
                    self.rotator.report_failure(&credential, status, &rate_limit_of(&err));
                    info!(credential = %credential.label(), status, "Credential failed; rotating");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(err) = last_error {
            if self.rotator.available_count() > 0 {
                return Err(err);
            }
        }

        match server_url {
            Some(server) => {
                warn!("No usable credential; falling back to the server proxy");
                self.get(&server, None, ROUTE_SERVER).await
            }
            None => {
                warn!("No usable credential; falling back to an unauthenticated call");
                self.get(url, None, ROUTE_DIRECT).await
            }
        }
    }

    async fn fetch_proxied(&self, target: &str, server_url: Option<String>, proxies_first: bool) -> Result<String> {
        let prefer_server = !proxies_first || self.proxies.is_empty();
        if let (true, Some(server)) = (prefer_server, server_url.as_deref()) {
            return self.get(server, None, ROUTE_SERVER).await;
        }

        match self.fetch_via_proxies(target).await {
            Ok(body) => Ok(body),
            Err(err) => match server_url {
                Some(server) => {
                    warn!("All intermediaries failed ({}); falling back to the server proxy", err);
                    self.get(&server, None, ROUTE_SERVER).await
                }
                None => Err(err),
            },
        }
    }

    /// Try intermediaries in health order, each once.
    ///
    /// Each proxy is first validated with a HEAD request under the short
    /// validation timeout. The body is then fetched under the client's default
    /// timeout. A failed validation, transport failure, 5xx or rate-limit
    /// response demotes the proxy and moves on to the next one; any other error
    /// response is returned as is.
    async fn fetch_via_proxies(&self, target: &str) -> Result<String> {
        let mut tried: Vec<String> = Vec::new();
        let mut last_error = None;

        while let Some(endpoint) = self.proxies.best_proxy_excluding(&tried) {
            tried.push(endpoint.base_url.clone());
            let url = endpoint.rewrite(target);
            let started = Instant::now();

            if let Err(err) = self.client.validate(&url, self.validation_timeout, ROUTE_PROXY).await {
                self.proxies.record_failure(&endpoint.base_url);
                warn!(proxy = %endpoint.name, "Proxy failed validation: {}", err);
                last_error = Some(err);
                continue;
            }

            match self.client.get_text(&url, None, None, ROUTE_PROXY).await {
                Ok(response) => {
                    self.proxies
                        .record_success(&endpoint.base_url, started.elapsed().as_millis() as u64);
                    return Ok(response.body);
                }
                Err(err) if err.is_transient() || err.is_rate_limit() => {
                    self.proxies.record_failure(&endpoint.base_url);
                    warn!(proxy = %endpoint.name, "Proxy fetch failed: {}", err);
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AccessError::Config("no intermediary or server proxy is configured".to_string())
        }))
    }
}

/// Race `fut` against `signal`; an abort wins ties.
async fn abortable<T>(signal: &AbortSignal, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = signal.aborted() => Err(AccessError::Aborted),
        result = fut => result,
    }
}

fn rate_limit_of(err: &AccessError) -> RateLimitInfo {
    match err {
        AccessError::RateLimit {
            remaining,
            reset_at,
            ..
        } => RateLimitInfo {
            remaining: *remaining,
            reset_at: *reset_at,
            retry_after: None,
        },
        _ => RateLimitInfo::default(),
    }
}

fn normalize_path(path: &str) -> String {
    path.trim().trim_matches('/').to_string()
}

fn contents_key(path: &str) -> String {
    format!("contents_{}", path)
}

fn file_key(url: &str) -> String {
    format!("file:{}", url)
}

/// First 12 hex chars of the listing digest, joined with the fetch time in ms.
pub fn freshness_version(items: &[ContentItem], fetched_at: DateTime<Utc>) -> String {
    let serialized = serde_json::to_vec(items).unwrap_or_default();
    let digest = hex::encode(Sha256::digest(&serialized));
    format!("{}-{}", &digest[..12], fetched_at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::ContentKind;

    fn item(name: &str) -> ContentItem {
        ContentItem {
            name: name.to_string(),
            path: name.to_string(),
            kind: ContentKind::File,
            size: 1,
            sha: None,
            url: None,
            html_url: None,
            download_url: None,
            content: None,
            encoding: None,
        }
    }

    #[test]
    fn test_freshness_version_tracks_content() {
        let at = Utc::now();
        let a = freshness_version(&[item("a")], at);
        let b = freshness_version(&[item("b")], at);
        assert_ne!(a, b);
        assert_eq!(a, freshness_version(&[item("a")], at));

        let (hash, millis) = a.split_once('-').unwrap();
        assert_eq!(hash.len(), 12);
        assert_eq!(millis, at.timestamp_millis().to_string());
    }

    #[test]
    fn test_keys() {
        assert_eq!(contents_key(&normalize_path("/docs/")), "contents_docs");
        assert_eq!(file_key("https://x/y"), "file:https://x/y");
    }

    #[test]
    fn test_rate_limit_of() {
        let err = AccessError::RateLimit {
            status: 403,
            endpoint: "/x".to_string(),
            method: "GET".to_string(),
            remaining: Some(0),
            reset_at: Some(42),
        };
        let info = rate_limit_of(&err);
        assert!(info.is_exhausted());
        assert_eq!(info.reset_at, Some(42));
        assert_eq!(rate_limit_of(&AccessError::Aborted), RateLimitInfo::default());
    }
}
