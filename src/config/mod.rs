// Configuration module
// Author: kelexine (https://github.com/kelexine)

mod models;

pub use models::*;

use crate::error::{AccessError, Result};
use config::{Config, Environment, File};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Maximum number of alternate intermediaries.
pub const MAX_PROXIES: usize = 3;

/// Highest numbered credential slot scanned per environment prefix.
const MAX_TOKEN_SLOTS: usize = 10;

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest)
    /// 2. Config file
    /// 3. Defaults (lowest)
    ///
    /// Credential tokens found in the numbered environment slots are appended
    /// to any tokens listed in the file.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_config_path())
    }

    /// Same as [`AppConfig::load`] but reads an explicit config file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            // Load from config file if it exists
            .add_source(File::from(path.to_path_buf()).required(false))
            // Override with environment variables (e.g. REPOLENS_REPOSITORY__OWNER)
            .add_source(
                Environment::with_prefix("REPOLENS")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("credentials.tokens")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AccessError::Config(e.to_string()))?;

        let mut app: AppConfig = config
            .try_deserialize()
            .map_err(|e| AccessError::Config(e.to_string()))?;

        let env_tokens = tokens_from_env(std::env::vars(), &app.credentials.env_prefixes);
        let file_tokens = std::mem::take(&mut app.credentials.tokens);
        app.credentials.tokens = dedupe_tokens(file_tokens.into_iter().chain(env_tokens));

        app.validate()?;
        Ok(app)
    }

    /// Reject configurations the access layer cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.repository.owner.trim().is_empty() || self.repository.name.trim().is_empty() {
            return Err(AccessError::Config(
                "repository.owner and repository.name must be set".to_string(),
            ));
        }
        if self.proxies.len() > MAX_PROXIES {
            return Err(AccessError::Config(format!(
                "at most {} proxies may be configured, found {}",
                MAX_PROXIES,
                self.proxies.len()
            )));
        }
        if self.access.production && self.access.server_proxy_url.is_none() && self.proxies.is_empty() {
            return Err(AccessError::Config(
                "production mode needs access.server_proxy_url or at least one proxy".to_string(),
            ));
        }
        Ok(())
    }

    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("repolens")
            .join("config.toml")
    }
}

/// Collect API tokens from `<PREFIX>` and `<PREFIX>1` .. `<PREFIX>10`.
///
/// Blank values are skipped. The result keeps first-seen order without duplicates.
pub fn tokens_from_env<I>(vars: I, prefixes: &[String]) -> Vec<String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let vars: std::collections::HashMap<String, String> = vars.into_iter().collect();
    let mut found = Vec::new();

    for prefix in prefixes {
        let slots = std::iter::once(prefix.clone())
            .chain((1..=MAX_TOKEN_SLOTS).map(|n| format!("{}{}", prefix, n)));
        for name in slots {
            if let Some(value) = vars.get(&name) {
                found.push(value.clone());
            }
        }
    }

    dedupe_tokens(found)
}

fn dedupe_tokens<I>(tokens: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    tokens
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProxyEndpoint, ProxyStrategy};

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_tokens_from_numbered_slots() {
        let prefixes = vec!["GITHUB_PAT".to_string(), "VITE_GITHUB_PAT".to_string()];
        let env = vars(&[
            ("GITHUB_PAT", "tok-a"),
            ("GITHUB_PAT2", "tok-b"),
            ("VITE_GITHUB_PAT1", "tok-a"),
            ("VITE_GITHUB_PAT10", "tok-c"),
            ("GITHUB_PAT11", "ignored"),
            ("GITHUB_PAT3", "   "),
        ]);

        let tokens = tokens_from_env(env, &prefixes);
        assert_eq!(tokens, vec!["tok-a", "tok-b", "tok-c"]);
    }

    #[test]
    fn test_validate_requires_repository() {
        let config = AppConfig::default();
        assert!(matches!(config.validate(), Err(AccessError::Config(_))));
    }

    #[test]
    fn test_validate_proxy_limit() {
        let mut config = AppConfig::default();
        config.repository.owner = "octo".to_string();
        config.repository.name = "repo".to_string();
        assert!(config.validate().is_ok());

        config.proxies = (0..4)
            .map(|i| ProxyEndpoint::new(format!("p{}", i), format!("https://p{}.example", i), ProxyStrategy::default()))
            .collect();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_prefetch_tables_are_ranked() {
        let prefetch = PrefetchConfig::default();
        assert_eq!(prefetch.important_dirs.first().map(String::as_str), Some("src"));
        assert!(prefetch.allowed_extensions.contains(&"md".to_string()));
        assert_eq!(prefetch.max_dirs, 3);
        assert_eq!(prefetch.max_files, 5);
    }
}
