// Metrics module for Prometheus observability
// Author: kelexine (https://github.com/kelexine)

mod registry;

pub use registry::{
    gather_metrics,
    CACHE_OPERATIONS,
    COALESCED_REQUESTS,
    CREDENTIALS_AVAILABLE,
    NETWORK_DURATION,
    NETWORK_REQUESTS,
    PREFETCH_REQUESTS,
    PROXY_HEALTHY,
};

/// Helper to record cache lookups
pub fn record_cache_operation(cache: &str, operation: &str) {
    CACHE_OPERATIONS.with_label_values(&[cache, operation]).inc();
}

pub fn record_cache_evictions(cache: &str, count: usize) {
    if count > 0 {
        CACHE_OPERATIONS
            .with_label_values(&[cache, "evicted"])
            .inc_by(count as f64);
    }
}

/// Helper to record remote calls
pub fn record_network_request(route: &str, outcome: &str, duration_secs: f64) {
    NETWORK_REQUESTS.with_label_values(&[route, outcome]).inc();
    NETWORK_DURATION.with_label_values(&[route]).observe(duration_secs);
}

pub fn record_coalesced(coordinator: &str, outcome: &str) {
    COALESCED_REQUESTS.with_label_values(&[coordinator, outcome]).inc();
}

pub fn record_prefetch(kind: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    PREFETCH_REQUESTS.with_label_values(&[kind, outcome]).inc();
}

pub fn update_credentials_available(count: usize) {
    CREDENTIALS_AVAILABLE
        .with_label_values(&["default"])
        .set(count as f64);
}

pub fn update_proxy_health(proxy: &str, healthy: bool) {
    PROXY_HEALTHY
        .with_label_values(&[proxy])
        .set(if healthy { 1.0 } else { 0.0 });
}
