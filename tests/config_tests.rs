// Configuration loading tests
// Author: kelexine (https://github.com/kelexine)

use repolens::config::AppConfig;
use repolens::error::AccessError;
use repolens::proxy::ProxyStrategy;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_from_file_layers_over_defaults() {
    let file = write_config(
        r#"
[repository]
owner = "octo"
name = "repo"
default_branch = "develop"

[access]
force_server_proxy = true
server_proxy_url = "https://app.example/api/github"

[credentials]
tokens = ["tok-file", "tok-file"]

[[proxies]]
name = "primary"
base_url = "https://proxy.example"
strategy = { kind = "prefix" }

[[proxies]]
name = "backup"
base_url = "https://backup.example/fetch"
strategy = { kind = "query", param = "target" }

[cache.contents]
max_size = 50
"#,
    );

    let config = AppConfig::load_from(file.path()).unwrap();

    assert_eq!(config.repository.owner, "octo");
    assert_eq!(config.repository.default_branch, "develop");
    assert_eq!(config.repository.api_base_url, "https://api.github.com");
    assert!(config.access.force_server_proxy);
    assert_eq!(config.credentials.tokens.iter().filter(|t| *t == "tok-file").count(), 1);

    assert_eq!(config.proxies.len(), 2);
    assert_eq!(config.proxies[0].strategy, ProxyStrategy::Prefix);
    assert_eq!(
        config.proxies[1].strategy,
        ProxyStrategy::Query {
            param: "target".to_string()
        }
    );

    assert_eq!(config.cache.contents.max_size, 50);
    assert_eq!(config.cache.contents.ttl_seconds, Some(300));
    assert_eq!(config.cache.files.max_size, 100);
    assert_eq!(config.search_index.index_branch, "search-index");
}

#[test]
fn test_unknown_proxy_strategy_is_rejected() {
    let file = write_config(
        r#"
[repository]
owner = "octo"
name = "repo"

[[proxies]]
name = "mystery"
base_url = "https://mystery.example"
strategy = { kind = "sniff_hostname" }
"#,
    );

    assert!(matches!(AppConfig::load_from(file.path()), Err(AccessError::Config(_))));
}

#[test]
fn test_too_many_proxies_rejected() {
    let proxies: String = (0..4)
        .map(|i| format!("[[proxies]]\nname = \"p{i}\"\nbase_url = \"https://p{i}.example\"\n\n"))
        .collect();
    let file = write_config(&format!("[repository]\nowner = \"octo\"\nname = \"repo\"\n\n{}", proxies));

    let err = AppConfig::load_from(file.path()).unwrap_err();
    assert!(err.to_string().contains("at most 3 proxies"));
}

#[test]
fn test_missing_repository_rejected() {
    let file = write_config("[server]\nport = 9000\n");
    assert!(matches!(AppConfig::load_from(file.path()), Err(AccessError::Config(_))));
}
