// Prometheus metrics registry and collectors
// Author: kelexine (https://github.com/kelexine)

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_histogram_vec_with_registry, CounterVec, Encoder, GaugeVec, HistogramVec, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // CACHE METRICS
    // ============================================================================

    /// Cache lookups and evictions
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("repolens_cache_operations_total", "Total adaptive cache operations"),
        &["cache", "operation"], // operation: hit, miss, expired, evicted
        REGISTRY
    ).unwrap();

    // ============================================================================
    // NETWORK METRICS
    // ============================================================================

    /// Remote calls by route and outcome
    pub static ref NETWORK_REQUESTS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("repolens_network_requests_total", "Total remote calls issued"),
        &["route", "outcome"], // route: direct, credential, server, proxy
        REGISTRY
    ).unwrap();

    /// Remote call duration
    pub static ref NETWORK_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("repolens_network_duration_seconds", "Remote call duration in seconds")
            .buckets(vec![0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["route"],
        REGISTRY
    ).unwrap();

    /// Coalescing outcomes
    pub static ref COALESCED_REQUESTS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("repolens_coalesced_requests_total", "Request coordinator outcomes"),
        &["coordinator", "outcome"], // outcome: issued, joined, timeout, abandoned
        REGISTRY
    ).unwrap();

    /// Prefetch attempts
    pub static ref PREFETCH_REQUESTS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("repolens_prefetch_total", "Background prefetch attempts"),
        &["kind", "outcome"], // kind: directory, file
        REGISTRY
    ).unwrap();

    // ============================================================================
    // CREDENTIAL & PROXY METRICS
    // ============================================================================

    /// Credentials currently usable
    pub static ref CREDENTIALS_AVAILABLE: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("repolens_credentials_available", "Credentials not currently exhausted"),
        &["pool"],
        REGISTRY
    ).unwrap();

    /// Proxy health (1 healthy, 0 unhealthy)
    pub static ref PROXY_HEALTHY: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("repolens_proxy_healthy", "Proxy health state"),
        &["proxy"],
        REGISTRY
    ).unwrap();
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
