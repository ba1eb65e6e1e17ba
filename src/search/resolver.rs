//! Branch-specific search index resolution.
//!
//! Resolution goes manifest first, then the index file it points at. Both
//! documents are fetched from the index branch on the raw content host, with
//! an optional fallback base URL tried next. Results are memoized. Concurrent
//! callers for the same branch share one resolution, and every resolution
//! shares one manifest fetch.

// Author: kelexine (https://github.com/kelexine)

use super::manifest::Manifest;
use super::normalize::{normalize, IndexDocument, SearchIndexFile};
use crate::cache::{AdaptiveCache, CacheConfig};
use crate::config::{RepositoryConfig, SearchIndexConfig};
use crate::error::{AccessError, Result};
use crate::github::GitHubClient;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const ROUTE_RAW: &str = "raw";
const MANIFEST_KEY: &str = "manifest";

/// A normalized, ready-to-query index for one branch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedIndex {
    pub branch: String,
    pub commit: String,
    pub generated_at: Option<String>,
    pub files: Vec<SearchIndexFile>,
}

type SharedIndex = Shared<BoxFuture<'static, Result<Arc<PreparedIndex>>>>;
type SharedManifest = Shared<BoxFuture<'static, Result<Arc<Manifest>>>>;

struct ResolverInner {
    client: GitHubClient,
    config: SearchIndexConfig,
    owner: String,
    repo: String,
    default_branch: String,
    manifest: AdaptiveCache<String, Arc<Manifest>>,
    indexes: AdaptiveCache<String, Arc<PreparedIndex>>,
    pending: Mutex<HashMap<String, (u64, SharedIndex)>>,
    pending_manifest: Mutex<Option<(u64, SharedManifest)>>,
    next_id: AtomicU64,
}

/// Resolves and memoizes prebuilt search indexes. Cheap to clone.
#[derive(Clone)]
pub struct SearchIndexResolver {
    inner: Arc<ResolverInner>,
}

impl SearchIndexResolver {
    pub fn new(client: GitHubClient, repository: &RepositoryConfig, config: SearchIndexConfig) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                client,
                owner: repository.owner.clone(),
                repo: repository.name.clone(),
                default_branch: repository.default_branch.clone(),
                config,
                manifest: AdaptiveCache::new("search_manifest", CacheConfig::default()),
                indexes: AdaptiveCache::new("search_index", CacheConfig::default()),
                pending: Mutex::new(HashMap::new()),
                pending_manifest: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Index for the repository's default branch.
    pub async fn get_index(&self, force: bool) -> Result<Arc<PreparedIndex>> {
        let branch = self.inner.default_branch.clone();
        self.get_index_for(&branch, force).await
    }

    /// Index for `branch`. `force` drops the memoized manifest and index first.
    ///
    /// Fails with [`AccessError::NoIndexForBranch`] when the manifest has no
    /// entry for the branch.
    pub async fn get_index_for(&self, branch: &str, force: bool) -> Result<Arc<PreparedIndex>> {
        if force {
            self.inner.manifest.delete(MANIFEST_KEY);
            self.inner.indexes.delete(branch);
        } else if let Some(index) = self.inner.indexes.get(branch) {
            return Ok(index);
        }

        let shared = {
            let mut pending = self.inner.pending.lock();
            match pending.get(branch) {
                Some((_, existing)) => existing.clone(),
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let inner = self.inner.clone();
                    let owned = branch.to_string();
                    let future = async move {
                        let result = inner.resolve(&owned).await;
                        let mut pending = inner.pending.lock();
                        if pending.get(&owned).map(|(current, _)| *current) == Some(id) {
                            pending.remove(&owned);
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    pending.insert(branch.to_string(), (id, future.clone()));
                    future
                }
            }
        };

        shared.await
    }

    /// Forget memoized manifests, indexes and pending resolutions.
    pub fn clear_cache(&self) {
        self.inner.manifest.clear();
        self.inner.indexes.clear();
        self.inner.pending.lock().clear();
        *self.inner.pending_manifest.lock() = None;
        debug!("Search index cache cleared");
    }
}

impl ResolverInner {
    async fn resolve(self: &Arc<Self>, branch: &str) -> Result<Arc<PreparedIndex>> {
        let manifest = self.manifest().await?;
        let entry = manifest
            .entry(branch)
            .cloned()
            .ok_or_else(|| AccessError::NoIndexForBranch {
                branch: branch.to_string(),
            })?;

        let body = self.fetch_first(&self.index_path(&entry.file)).await?;
        let document: IndexDocument = serde_json::from_str(&body)
            .map_err(|e| AccessError::Validation(format!("malformed search index for '{}': {}", branch, e)))?;

        let files: Vec<SearchIndexFile> = document
            .into_records()
            .into_iter()
            .filter(|record| !record.path.trim().is_empty())
            .map(normalize)
            .collect();

        info!(branch, commit = %entry.commit, files = files.len(), "Search index prepared");
        let index = Arc::new(PreparedIndex {
            branch: entry.branch,
            commit: entry.commit,
            generated_at: entry.generated_at,
            files,
        });
        self.indexes.set(branch.to_string(), index.clone());
        Ok(index)
    }

    /// Memoized manifest. Resolutions for different branches share one fetch.
    async fn manifest(self: &Arc<Self>) -> Result<Arc<Manifest>> {
        if let Some(manifest) = self.manifest.get(MANIFEST_KEY) {
            return Ok(manifest);
        }

        let shared = {
            let mut pending = self.pending_manifest.lock();
            match pending.as_ref() {
                Some((_, existing)) => existing.clone(),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let inner = self.clone();
                    let future = async move {
                        let result = inner.fetch_manifest().await;
                        let mut pending = inner.pending_manifest.lock();
                        if pending.as_ref().map(|(current, _)| *current) == Some(id) {
                            *pending = None;
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    *pending = Some((id, future.clone()));
                    future
                }
            }
        };

        shared.await
    }

    async fn fetch_manifest(&self) -> Result<Arc<Manifest>> {
        let body = self.fetch_first(&self.config.manifest_path).await?;
        let manifest: Manifest = serde_json::from_str(&body)
            .map_err(|e| AccessError::Validation(format!("malformed search manifest: {}", e)))?;
        let manifest = Arc::new(manifest);
        self.manifest.set(MANIFEST_KEY.to_string(), manifest.clone());
        Ok(manifest)
    }

    /// Index files named without a directory live under the base path.
    fn index_path(&self, file: &str) -> String {
        let file = file.trim_start_matches('/');
        if file.contains('/') || self.config.base_path.is_empty() {
            file.to_string()
        } else {
            format!("{}/{}", self.config.base_path.trim_matches('/'), file)
        }
    }

    fn candidate_urls(&self, relative: &str) -> Vec<String> {
        let relative = relative.trim_start_matches('/');
        let mut urls = vec![format!(
            "{}/{}/{}/{}/{}",
            self.config.raw_base_url.trim_end_matches('/'),
            self.owner,
            self.repo,
            self.config.index_branch,
            relative
        )];
        if let Some(fallback) = &self.config.fallback_raw_url {
            urls.push(format!("{}/{}", fallback.trim_end_matches('/'), relative));
        }
        urls
    }

    /// First successful body among the candidate URLs; otherwise the last error.
    async fn fetch_first(&self, relative: &str) -> Result<String> {
        let timeout = Duration::from_secs(self.config.timeout_secs.max(1));
        let mut last_error = None;

        for url in self.candidate_urls(relative) {
            match self.client.get_text(&url, None, Some(timeout), ROUTE_RAW).await {
                Ok(response) => return Ok(response.body),
                Err(e) => {
                    debug!(url = %url, "Index source failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AccessError::Internal("no index source configured".to_string())))
    }
}
