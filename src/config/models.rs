//! Configuration data structures for repolens.
//!
//! This module defines the schema for the application settings: the
//! repository being browsed, credential and proxy pools, cache sizing,
//! prefetch weight tables and the search-index location.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::cache::CacheConfig;
use crate::coordinator::CoordinatorConfig;
use crate::proxy::ProxyEndpoint;
use serde::{Deserialize, Serialize};

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// HTTP server settings for the server-side proxy endpoint.
    #[serde(default)]
    pub server: ServerConfig,

    /// The repository being browsed.
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Access policy, timeouts and the server-side proxy location.
    #[serde(default)]
    pub access: AccessConfig,

    /// API tokens used for rotation.
    #[serde(default)]
    pub credentials: CredentialConfig,

    /// Alternate intermediaries, primary first (at most three).
    #[serde(default)]
    pub proxies: Vec<ProxyEndpoint>,

    /// Sizing for the content caches.
    #[serde(default)]
    pub cache: CachesConfig,

    /// Request coalescing and background gating.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Weight tables for opportunistic prefetching.
    #[serde(default)]
    pub prefetch: PrefetchConfig,

    /// Location of the prebuilt search indexes.
    #[serde(default)]
    pub search_index: SearchIndexConfig,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the built-in HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Default: `127.0.0.1`
    #[serde(default = "default_host")]
    pub host: String,

    /// Default: `8080`
    #[serde(default = "default_port")]
    pub port: u16,
}

/// The remote repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub name: String,

    /// Default: `main`
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Default: `https://api.github.com`
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

/// How calls reach the remote API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Constrained deployment: direct calls are disallowed and everything goes
    /// through the server-side proxy.
    #[serde(default)]
    pub production: bool,

    /// Force server-side proxy mode even outside production.
    #[serde(default)]
    pub force_server_proxy: bool,

    /// Same-origin proxy endpoint, e.g. `https://app.example/api/github`.
    #[serde(default)]
    pub server_proxy_url: Option<String>,

    /// Timeout for fetching through an intermediary before failing over.
    /// Default: `5`
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,

    /// Timeout for background proxy health checks.
    /// Default: `5`
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,

    /// Interval between background proxy health checks.
    /// Default: `30`
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// URL requested (HEAD) through each proxy when probing.
    #[serde(default = "default_check_target")]
    pub check_target: String,

    /// Extra attempts for transient (network / 5xx) failures.
    /// Default: `1`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// `User-Agent` sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// API tokens used for rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Tokens listed directly in configuration.
    #[serde(default)]
    pub tokens: Vec<String>,

    /// Environment prefixes scanned for numbered slots (`<PREFIX>`, `<PREFIX>1` .. `<PREFIX>10`).
    /// Default: `GITHUB_PAT`, `VITE_GITHUB_PAT`
    #[serde(default = "default_env_prefixes")]
    pub env_prefixes: Vec<String>,

    /// How long a rejected credential sits out when the server gives no reset time.
    /// Default: `3600`
    #[serde(default = "default_cooldown")]
    pub exhausted_cooldown_secs: u64,
}

/// Cache sizing for directory listings and file bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachesConfig {
    #[serde(default = "default_contents_cache")]
    pub contents: CacheConfig,

    #[serde(default = "default_files_cache")]
    pub files: CacheConfig,
}

/// Prefetch weight tables.
///
/// Which directories and files are worth fetching ahead of time is a product
/// decision, so every list here is configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory names in order of importance; earlier names rank higher.
    #[serde(default = "default_important_dirs")]
    pub important_dirs: Vec<String>,

    /// File-name prefixes (case-insensitive) that rank ahead of everything else.
    #[serde(default = "default_readme_prefixes")]
    pub readme_prefixes: Vec<String>,

    /// Lower-case extensions eligible for file prefetch.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// Files larger than this (bytes) are never prefetched.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_max_dirs")]
    pub max_dirs: usize,

    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

/// Where the prebuilt search indexes live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchIndexConfig {
    /// Branch holding the manifest and index files.
    /// Default: `search-index`
    #[serde(default = "default_index_branch")]
    pub index_branch: String,

    /// Manifest path relative to the index branch root.
    /// Default: `manifest.json`
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,

    /// Directory prefix applied to index files named without one.
    /// Default: `indexes`
    #[serde(default = "default_index_base_path")]
    pub base_path: String,

    /// Raw content host.
    /// Default: `https://raw.githubusercontent.com`
    #[serde(default = "default_raw_base_url")]
    pub raw_base_url: String,

    /// Secondary base URL tried after the raw content host.
    #[serde(default)]
    pub fallback_raw_url: Option<String>,

    /// Request timeout for manifest and index downloads.
    /// Default: `15`
    #[serde(default = "default_index_timeout")]
    pub timeout_secs: u64,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to mask API tokens in logged error bodies.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub sanitize_tokens: bool,
}

// Default trait implementations linking to custom logic

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            name: String::new(),
            default_branch: default_branch(),
            api_base_url: default_api_base_url(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            production: false,
            force_server_proxy: false,
            server_proxy_url: None,
            validation_timeout_secs: default_validation_timeout(),
            check_timeout_secs: default_check_timeout(),
            check_interval_secs: default_check_interval(),
            check_target: default_check_target(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            env_prefixes: default_env_prefixes(),
            exhausted_cooldown_secs: default_cooldown(),
        }
    }
}

impl Default for CachesConfig {
    fn default() -> Self {
        Self {
            contents: default_contents_cache(),
            files: default_files_cache(),
        }
    }
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            important_dirs: default_important_dirs(),
            readme_prefixes: default_readme_prefixes(),
            allowed_extensions: default_allowed_extensions(),
            max_file_size: default_max_file_size(),
            max_dirs: default_max_dirs(),
            max_files: default_max_files(),
        }
    }
}

impl Default for SearchIndexConfig {
    fn default() -> Self {
        Self {
            index_branch: default_index_branch(),
            manifest_path: default_manifest_path(),
            base_path: default_index_base_path(),
            raw_base_url: default_raw_base_url(),
            fallback_raw_url: None,
            timeout_secs: default_index_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            sanitize_tokens: true,
        }
    }
}

/// Conventional names seeding the prefetch tables, ranked by weight.
static IMPORTANT_DIRS: phf::Map<&'static str, u8> = phf::phf_map! {
    "src" => 0,
    "docs" => 1,
    "lib" => 2,
    "app" => 3,
    "components" => 4,
    "packages" => 5,
    "examples" => 6,
    "test" => 7,
    "tests" => 8,
};

static PREFETCH_EXTENSIONS: phf::Set<&'static str> = phf::phf_set! {
    "md", "txt", "json", "toml", "yaml", "yml", "rs", "ts", "tsx", "js", "jsx", "py", "go",
};

// Helper functions for serde defaults and shared constants
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_validation_timeout() -> u64 {
    5
}

fn default_check_timeout() -> u64 {
    5
}

fn default_check_interval() -> u64 {
    30
}

fn default_check_target() -> String {
    "https://raw.githubusercontent.com/github/gitignore/main/README.md".to_string()
}

fn default_max_retries() -> u32 {
    1
}

fn default_user_agent() -> String {
    format!("repolens/{}", env!("CARGO_PKG_VERSION"))
}

fn default_env_prefixes() -> Vec<String> {
    vec!["GITHUB_PAT".to_string(), "VITE_GITHUB_PAT".to_string()]
}

fn default_cooldown() -> u64 {
    3600 // 1 hour
}

fn default_contents_cache() -> CacheConfig {
    CacheConfig::with_ttl(300)
}

fn default_files_cache() -> CacheConfig {
    CacheConfig {
        max_size: 100,
        ..CacheConfig::with_ttl(600)
    }
}

fn default_important_dirs() -> Vec<String> {
    let mut dirs: Vec<(&str, u8)> = IMPORTANT_DIRS.entries().map(|(k, v)| (*k, *v)).collect();
    dirs.sort_by_key(|(_, weight)| *weight);
    dirs.into_iter().map(|(name, _)| name.to_string()).collect()
}

fn default_readme_prefixes() -> Vec<String> {
    vec!["readme".to_string()]
}

fn default_allowed_extensions() -> Vec<String> {
    let mut exts: Vec<String> = PREFETCH_EXTENSIONS.iter().map(|e| e.to_string()).collect();
    exts.sort();
    exts
}

fn default_max_file_size() -> u64 {
    100 * 1024
}

fn default_max_dirs() -> usize {
    3
}

fn default_max_files() -> usize {
    5
}

fn default_index_branch() -> String {
    "search-index".to_string()
}

fn default_manifest_path() -> String {
    "manifest.json".to_string()
}

fn default_index_base_path() -> String {
    "indexes".to_string()
}

fn default_raw_base_url() -> String {
    "https://raw.githubusercontent.com".to_string()
}

fn default_index_timeout() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
