// Content service tests against a mock API
// Author: kelexine (https://github.com/kelexine)

use mockito::{Matcher, Server, ServerGuard};
use repolens::config::AppConfig;
use repolens::credentials::CredentialRotator;
use repolens::error::AccessError;
use repolens::proxy::{ProxyEndpoint, ProxyHealthManager, ProxyStrategy};
use repolens::service::{AbortSignal, AccessPolicy, ContentService};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const DOCS_LISTING: &str = r#"[
    {"name": "guide.md", "path": "docs/guide.md", "type": "file", "size": 10}
]"#;

fn config_for(api_base: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.repository.owner = "octo".to_string();
    config.repository.name = "repo".to_string();
    config.repository.api_base_url = api_base.to_string();
    config.access.max_retries = 0;
    config
}

fn service(config: &AppConfig, policy: AccessPolicy, tokens: &[&str], proxies: Vec<ProxyEndpoint>) -> ContentService {
    let rotator = Arc::new(CredentialRotator::new(tokens.iter().copied(), 3600));
    let proxies = Arc::new(ProxyHealthManager::new(proxies));
    ContentService::new(config, policy, rotator, proxies).unwrap()
}

fn ref_main() -> Matcher {
    Matcher::UrlEncoded("ref".into(), "main".into())
}

async fn mock_server() -> ServerGuard {
    Server::new_async().await
}

/// Answers HEAD at once; GET sends headers at once and `body` after `delay`.
async fn slow_server(body: &'static str, delay: Duration) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                if request.starts_with(b"HEAD") {
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                        .await;
                    return;
                }

                let head = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.flush().await;
                tokio::time::sleep(delay).await;
                let _ = socket.write_all(body.as_bytes()).await;
            });
        }
    });

    base
}

#[tokio::test]
async fn test_concurrent_listings_share_one_call() {
    let mut server = mock_server().await;
    let mock = server
        .mock("GET", "/repos/octo/repo/contents/docs")
        .match_query(ref_main())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(DOCS_LISTING)
        .expect(1)
        .create_async()
        .await;

    let config = config_for(&server.url());
    let service = service(&config, AccessPolicy::DirectUnauthenticated, &[], vec![]);

    let (a, b, c) = tokio::join!(
        service.get_contents("/docs"),
        service.get_contents("/docs"),
        service.get_contents("docs/"),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&b, &c));
    assert_eq!(a[0].name, "guide.md");

    // Served from cache afterwards
    let again = service.get_contents("docs").await.unwrap();
    assert!(Arc::ptr_eq(&a, &again));
    assert!(service.contents_version("docs").is_some());

    mock.assert_async().await;
    let stats = service.network_stats();
    assert_eq!(stats.coordinators.contents.issued, 1);
    assert_eq!(stats.coordinators.contents.joined, 2);
}

#[tokio::test]
async fn test_rate_limited_credential_is_rotated() {
    let mut server = mock_server().await;
    let exhausted = server
        .mock("GET", "/repos/octo/repo/contents/src")
        .match_query(ref_main())
        .match_header("authorization", "Bearer tok-a")
        .with_status(403)
        .with_header("x-ratelimit-remaining", "0")
        .with_header("x-ratelimit-reset", "4102444800")
        .with_body(r#"{"message":"API rate limit exceeded"}"#)
        .expect(1)
        .create_async()
        .await;
    let fresh = server
        .mock("GET", Matcher::Regex(r"^/repos/octo/repo/contents/(src|lib)$".to_string()))
        .match_query(ref_main())
        .match_header("authorization", "Bearer tok-b")
        .with_status(200)
        .with_header("x-ratelimit-remaining", "4999")
        .with_body(r#"[{"name":"main.rs","path":"src/main.rs","type":"file","size":3}]"#)
        .expect(2)
        .create_async()
        .await;

    let config = config_for(&server.url());
    let service = service(&config, AccessPolicy::DirectWithCredential, &["tok-a", "tok-b"], vec![]);

    let items = service.get_contents("src").await.unwrap();
    assert_eq!(items.len(), 1);

    // tok-a stays out of rotation until its reset
    service.get_contents("lib").await.unwrap();

    exhausted.assert_async().await;
    fresh.assert_async().await;

    let stats = service.network_stats();
    assert_eq!(stats.credentials_total, 2);
    assert_eq!(stats.credentials_available, 1);
    assert!(!stats.credentials[0].available);
    assert_eq!(stats.credentials[1].remaining_quota, Some(4999));
}

#[tokio::test]
async fn test_exhausted_pool_falls_back_to_unauthenticated() {
    let mut server = mock_server().await;
    let _exhausted = server
        .mock("GET", "/repos/octo/repo/contents/docs")
        .match_query(ref_main())
        .match_header("authorization", "Bearer tok-a")
        .with_status(429)
        .with_header("retry-after", "120")
        .expect(1)
        .create_async()
        .await;
    let anonymous = server
        .mock("GET", "/repos/octo/repo/contents/docs")
        .match_query(ref_main())
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body(DOCS_LISTING)
        .expect(1)
        .create_async()
        .await;

    let config = config_for(&server.url());
    let service = service(&config, AccessPolicy::DirectWithCredential, &["tok-a"], vec![]);

    let items = service.get_contents("docs").await.unwrap();
    assert_eq!(items.len(), 1);
    anonymous.assert_async().await;
    assert_eq!(service.rotator().available_count(), 0);
}

#[tokio::test]
async fn test_not_found_surfaces_typed_error() {
    let mut server = mock_server().await;
    let _missing = server
        .mock("GET", "/repos/octo/repo/contents/nope")
        .match_query(ref_main())
        .with_status(404)
        .with_body(r#"{"message":"Not Found"}"#)
        .create_async()
        .await;

    let config = config_for(&server.url());
    let service = service(&config, AccessPolicy::DirectUnauthenticated, &[], vec![]);

    match service.get_contents("nope").await {
        Err(AccessError::Api { status, method, message, .. }) => {
            assert_eq!(status, 404);
            assert_eq!(method, "GET");
            assert_eq!(message, "Not Found");
        }
        other => panic!("expected API error, got {:?}", other),
    }
    assert_eq!(service.cache_stats().contents.size, 0);
}

#[tokio::test]
async fn test_cancelled_signal_skips_network_and_cache() {
    let mut server = mock_server().await;
    let mock = server
        .mock("GET", "/repos/octo/repo/contents/docs")
        .match_query(Matcher::Any)
        .with_body(DOCS_LISTING)
        .expect(0)
        .create_async()
        .await;

    let config = config_for(&server.url());
    let service = service(&config, AccessPolicy::DirectUnauthenticated, &[], vec![]);

    let signal = AbortSignal::new();
    signal.abort();
    let result = service.get_contents_with_signal("docs", &signal).await;

    assert_eq!(result.unwrap_err(), AccessError::Aborted);
    assert_eq!(service.cache_stats().contents.size, 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_abort_in_flight_is_not_a_credential_failure() {
    // Accepts connections but never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let config = config_for(&base);
    let service = service(&config, AccessPolicy::DirectWithCredential, &["tok-a"], vec![]);

    let signal = AbortSignal::new();
    let canceller = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.abort();
    });

    let result = service.get_contents_with_signal("docs", &signal).await;
    assert_eq!(result.unwrap_err(), AccessError::Aborted);

    assert_eq!(service.cache_stats().contents.size, 0);
    let stats = service.network_stats();
    assert_eq!(stats.coordinators.contents.abandoned, 1);
    assert_eq!(stats.coordinators.contents.in_flight, 0);
    assert_eq!(stats.credentials[0].consecutive_failures, 0);
    assert!(stats.credentials[0].available);
    drop(listener);
}

#[tokio::test]
async fn test_file_read_fails_over_between_proxies() {
    let mut server = mock_server().await;
    let target = "https://raw.githubusercontent.com/octo/repo/main/README.md";
    let broken = server
        .mock("HEAD", "/a")
        .match_query(Matcher::UrlEncoded("url".into(), target.into()))
        .with_status(502)
        .expect(1)
        .create_async()
        .await;
    let never_fetched = server
        .mock("GET", "/a")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let validated = server
        .mock("HEAD", "/b")
        .match_query(Matcher::UrlEncoded("url".into(), target.into()))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let working = server
        .mock("GET", "/b")
        .match_query(Matcher::UrlEncoded("url".into(), target.into()))
        .with_status(200)
        .with_body("# repo")
        .expect(1)
        .create_async()
        .await;

    let config = config_for(&server.url());
    let proxies = vec![
        ProxyEndpoint::new("a", format!("{}/a", server.url()), ProxyStrategy::default()),
        ProxyEndpoint::new("b", format!("{}/b", server.url()), ProxyStrategy::default()),
    ];
    let service = service(&config, AccessPolicy::ServerProxied, &[], proxies);

    let text = service.get_file_content(target).await.unwrap();
    assert_eq!(text.as_str(), "# repo");

    // Cached: no further proxy traffic
    let again = service.get_file_content(target).await.unwrap();
    assert!(Arc::ptr_eq(&text, &again));

    broken.assert_async().await;
    never_fetched.assert_async().await;
    validated.assert_async().await;
    working.assert_async().await;

    let health = service.proxies().health_stats();
    assert_eq!(health[0].consecutive_failures, 1);
    assert!(health[1].is_healthy);
    assert!(health[1].response_time_ms.is_some());

    service.clear_cache();
    assert_eq!(service.proxies().health_stats()[0].consecutive_failures, 0);
    assert_eq!(service.cache_stats().files.size, 0);
}

#[tokio::test]
async fn test_slow_proxy_download_outlives_validation_timeout() {
    let base = slow_server("# slow readme", Duration::from_millis(1500)).await;
    let target = "https://raw.githubusercontent.com/octo/repo/main/README.md";

    let mut config = config_for("http://127.0.0.1:9");
    config.access.validation_timeout_secs = 1;
    let proxies = vec![ProxyEndpoint::new("slow", format!("{}/p", base), ProxyStrategy::default())];
    let service = service(&config, AccessPolicy::ServerProxied, &[], proxies);

    let text = service.get_file_content(target).await.unwrap();
    assert_eq!(text.as_str(), "# slow readme");

    let health = service.proxies().health_stats();
    assert_eq!(health[0].consecutive_failures, 0);
    assert!(health[0].is_healthy);
}

#[tokio::test]
async fn test_clear_during_fetch_does_not_repopulate_cache() {
    let base = slow_server(DOCS_LISTING, Duration::from_millis(300)).await;
    let config = config_for(&base);
    let service = service(&config, AccessPolicy::DirectUnauthenticated, &[], vec![]);

    let background = service.clone();
    let pending = tokio::spawn(async move { background.get_contents("docs").await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    service.clear_cache();

    // The caller still gets its answer
    let items = pending.await.unwrap().unwrap();
    assert_eq!(items[0].name, "guide.md");

    assert_eq!(service.cache_stats().contents.size, 0);
    assert!(service.contents_version("docs").is_none());
}

#[tokio::test]
async fn test_server_proxied_listing_uses_server_endpoint() {
    let mut server = mock_server().await;
    let proxied = server
        .mock("GET", "/api/github")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("action".into(), "getContents".into()),
            Matcher::UrlEncoded("path".into(), "docs".into()),
        ]))
        .with_status(200)
        .with_body(DOCS_LISTING)
        .expect(1)
        .create_async()
        .await;

    let mut config = config_for("http://127.0.0.1:9");
    config.access.server_proxy_url = Some(format!("{}/api/github", server.url()));
    let service = service(&config, AccessPolicy::ServerProxied, &["unused"], vec![]);

    let items = service.get_contents("docs").await.unwrap();
    assert_eq!(items[0].path, "docs/guide.md");
    proxied.assert_async().await;
}

#[tokio::test]
async fn test_base64_payload_is_decoded() {
    let mut server = mock_server().await;
    let _file = server
        .mock("GET", "/repos/octo/repo/contents/README.md")
        .match_query(ref_main())
        .with_status(200)
        .with_body(r#"{"name":"README.md","path":"README.md","type":"file","encoding":"base64","content":"aGVsbG8K"}"#)
        .create_async()
        .await;

    let config = config_for(&server.url());
    let service = service(&config, AccessPolicy::DirectUnauthenticated, &[], vec![]);
    let url = format!("{}/repos/octo/repo/contents/README.md?ref=main", server.url());

    assert_eq!(service.get_file_content(&url).await.unwrap().as_str(), "hello\n");
}

#[tokio::test]
async fn test_prefetch_warms_related_items() {
    let mut server = mock_server().await;
    let base = server.url();
    let listing = format!(
        r#"[
            {{"name":"src","path":"src","type":"dir","size":0}},
            {{"name":"docs","path":"docs","type":"dir","size":0}},
            {{"name":"zeta","path":"zeta","type":"dir","size":0}},
            {{"name":"other","path":"other","type":"dir","size":0}},
            {{"name":"README.md","path":"README.md","type":"file","size":20,"download_url":"{base}/raw/README.md"}},
            {{"name":"logo.png","path":"logo.png","type":"file","size":20,"download_url":"{base}/raw/logo.png"}}
        ]"#
    );
    let items: Vec<repolens::github::ContentItem> = serde_json::from_str(&listing).unwrap();

    let dirs = server
        .mock("GET", Matcher::Regex(r"^/repos/octo/repo/contents/(src|docs)$".to_string()))
        .match_query(ref_main())
        .with_status(200)
        .with_body("[]")
        .expect(2)
        .create_async()
        .await;
    let failing = server
        .mock("GET", "/repos/octo/repo/contents/other")
        .match_query(ref_main())
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    let readme = server
        .mock("GET", "/raw/README.md")
        .with_status(200)
        .with_body("hello")
        .expect(1)
        .create_async()
        .await;
    let untouched = server
        .mock("GET", Matcher::Regex(r"^/(raw/logo\.png|repos/octo/repo/contents/zeta)".to_string()))
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let config = config_for(&base);
    let service = service(&config, AccessPolicy::DirectUnauthenticated, &[], vec![]);

    // src, docs, other are the top three directories; "other" fails quietly
    let warmed = service.prefetch_related(&items).await;
    assert_eq!(warmed, 3);

    dirs.assert_async().await;
    failing.assert_async().await;
    readme.assert_async().await;
    untouched.assert_async().await;

    let stats = service.cache_stats();
    assert_eq!(stats.contents.size, 2);
    assert_eq!(stats.files.size, 1);
}

#[tokio::test]
async fn test_search_is_scoped_to_repository() {
    let mut server = mock_server().await;
    let search = server
        .mock("GET", "/search/code")
        .match_query(Matcher::UrlEncoded("q".into(), "parser repo:octo/repo".into()))
        .with_status(200)
        .with_body(r#"{"total_count":1,"incomplete_results":false,"items":[{"name":"parser.rs","path":"src/parser.rs","score":1.0}]}"#)
        .expect(1)
        .create_async()
        .await;

    let config = config_for(&server.url());
    let service = service(&config, AccessPolicy::DirectUnauthenticated, &[], vec![]);

    let (a, b) = tokio::join!(service.search_code("parser"), service.search_code("parser"));
    assert_eq!(a.unwrap().items[0].path, "src/parser.rs");
    assert_eq!(b.unwrap().total_count, 1);
    search.assert_async().await;

    assert!(matches!(service.search_code("  ").await, Err(AccessError::Validation(_))));
}
