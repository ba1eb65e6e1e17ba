// Proxy URL rewrite strategies
// Author: kelexine (https://github.com/kelexine)

use serde::{Deserialize, Serialize};

/// How a target URL is expressed through an intermediary.
///
/// Each proxy names its strategy explicitly in configuration; unknown names
/// are rejected when the configuration is deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProxyStrategy {
    /// `{base}?{param}={urlencoded target}`
    Query {
        #[serde(default = "default_param")]
        param: String,
    },
    /// `{base}/{target}`
    Prefix,
    /// `{base}{target path and query}`; the target's scheme and host are dropped.
    HostReplace,
}

impl Default for ProxyStrategy {
    fn default() -> Self {
        ProxyStrategy::Query {
            param: default_param(),
        }
    }
}

impl ProxyStrategy {
    /// Rewrite `target` to go through the proxy at `base`.
    pub fn rewrite(&self, base: &str, target: &str) -> String {
        match self {
            ProxyStrategy::Query { param } => {
                let separator = if base.contains('?') { '&' } else { '?' };
                format!(
                    "{}{}{}={}",
                    base,
                    separator,
                    param,
                    urlencoding::encode(target)
                )
            }
            ProxyStrategy::Prefix => {
                format!("{}/{}", base.trim_end_matches('/'), target)
            }
            ProxyStrategy::HostReplace => {
                format!("{}{}", base.trim_end_matches('/'), path_and_query(target))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProxyStrategy::Query { .. } => "query",
            ProxyStrategy::Prefix => "prefix",
            ProxyStrategy::HostReplace => "host_replace",
        }
    }
}

/// Everything after `scheme://host`, always starting with `/`.
fn path_and_query(url: &str) -> &str {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    match without_scheme.find('/') {
        Some(idx) => &without_scheme[idx..],
        None => "/",
    }
}

fn default_param() -> String {
    "url".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: &str = "https://raw.githubusercontent.com/o/r/main/a b.md";

    #[test]
    fn test_query_strategy_encodes_target() {
        let strategy = ProxyStrategy::default();
        assert_eq!(
            strategy.rewrite("https://proxy.example/fetch", TARGET),
            "https://proxy.example/fetch?url=https%3A%2F%2Fraw.githubusercontent.com%2Fo%2Fr%2Fmain%2Fa%20b.md"
        );

        let custom = ProxyStrategy::Query { param: "quest".to_string() };
        assert!(custom
            .rewrite("https://p.example/?mode=raw", "https://x.example/")
            .starts_with("https://p.example/?mode=raw&quest="));
    }

    #[test]
    fn test_prefix_strategy() {
        assert_eq!(
            ProxyStrategy::Prefix.rewrite("https://cors.example/", "https://x.example/a"),
            "https://cors.example/https://x.example/a"
        );
    }

    #[test]
    fn test_host_replace_strategy() {
        assert_eq!(
            ProxyStrategy::HostReplace.rewrite("https://mirror.example", "https://x.example/o/r/f.txt?raw=1"),
            "https://mirror.example/o/r/f.txt?raw=1"
        );
        assert_eq!(
            ProxyStrategy::HostReplace.rewrite("https://mirror.example", "https://x.example"),
            "https://mirror.example/"
        );
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let parsed: Result<ProxyStrategy, _> = serde_json::from_str(r#"{"kind":"sniff_hostname"}"#);
        assert!(parsed.is_err());

        let parsed: ProxyStrategy = serde_json::from_str(r#"{"kind":"query"}"#).unwrap();
        assert_eq!(parsed, ProxyStrategy::default());
    }
}
