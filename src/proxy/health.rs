//! Proxy health tracking and failover selection.
//!
//! Each configured intermediary is either healthy or unhealthy. A proxy turns
//! unhealthy after [`MAX_FAILURES`] consecutive failures and becomes eligible
//! for retry once [`RECOVERY_TIME`] has passed since its last failure. It is
//! only marked healthy again after a real call or a background health check succeeds.

// Author: kelexine (https://github.com/kelexine)

use super::strategy::ProxyStrategy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Consecutive failures before a proxy is marked unhealthy.
pub const MAX_FAILURES: u32 = 3;

/// Time after the last failure before an unhealthy proxy may be retried.
pub const RECOVERY_TIME: Duration = Duration::from_secs(5 * 60);

/// Interval between background health-check rounds.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Smoothing factor for the response-time moving average.
const RESPONSE_TIME_ALPHA: f64 = 0.3;

/// A configured intermediary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub strategy: ProxyStrategy,
}

impl ProxyEndpoint {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, strategy: ProxyStrategy) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            strategy,
        }
    }

    /// Target URL expressed through this proxy.
    pub fn rewrite(&self, target: &str) -> String {
        self.strategy.rewrite(&self.base_url, target)
    }
}

/// Snapshot of one proxy's health.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyHealth {
    pub name: String,
    pub url: String,
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub failure_count: u64,
    pub response_time_ms: Option<u64>,
    pub seconds_since_failure: Option<u64>,
    pub seconds_since_success: Option<u64>,
    pub recovery_eligible: bool,
}

struct ProxyState {
    endpoint: ProxyEndpoint,
    is_healthy: bool,
    consecutive_failures: u32,
    failure_count: u64,
    response_time_ms: Option<f64>,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
}

impl ProxyState {
    fn new(endpoint: ProxyEndpoint) -> Self {
        Self {
            endpoint,
            is_healthy: true,
            consecutive_failures: 0,
            failure_count: 0,
            response_time_ms: None,
            last_failure_at: None,
            last_success_at: None,
        }
    }

    fn recovery_eligible(&self, now: Instant, recovery_time: Duration) -> bool {
        !self.is_healthy
            && self
                .last_failure_at
                .map_or(true, |at| now.saturating_duration_since(at) > recovery_time)
    }
}

/// Scores configured proxies and picks the best one for each call.
pub struct ProxyHealthManager {
    proxies: Mutex<Vec<ProxyState>>,
    max_failures: u32,
    recovery_time: Duration,
}

impl ProxyHealthManager {
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Self {
        Self::with_thresholds(endpoints, MAX_FAILURES, RECOVERY_TIME)
    }

    pub fn with_thresholds(endpoints: Vec<ProxyEndpoint>, max_failures: u32, recovery_time: Duration) -> Self {
        for endpoint in &endpoints {
            crate::metrics::update_proxy_health(&endpoint.name, true);
        }
        Self {
            proxies: Mutex::new(endpoints.into_iter().map(ProxyState::new).collect()),
            max_failures: max_failures.max(1),
            recovery_time,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.proxies.lock().len()
    }

    /// Best proxy for the next call, or `None` when no proxies are configured.
    pub fn get_best_proxy(&self) -> Option<ProxyEndpoint> {
        self.best_proxy_excluding(&[])
    }

    /// Best proxy whose base URL is not in `tried`.
    ///
    /// Healthy proxies win, fastest first. Without a healthy candidate, a proxy
    /// whose recovery window has elapsed is chosen; failing that, the first
    /// remaining proxy in configuration order, so the caller is never blocked.
    pub fn best_proxy_excluding(&self, tried: &[String]) -> Option<ProxyEndpoint> {
        let now = Instant::now();
        let proxies = self.proxies.lock();
        let candidates: Vec<&ProxyState> = proxies
            .iter()
            .filter(|p| !tried.contains(&p.endpoint.base_url))
            .collect();

        let healthy = candidates
            .iter()
            .filter(|p| p.is_healthy)
            // min_by keeps the first of equal elements, preserving config order
            .min_by(|a, b| {
                let a = a.response_time_ms.unwrap_or(0.0);
                let b = b.response_time_ms.unwrap_or(0.0);
                a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
            });
        if let Some(proxy) = healthy {
            return Some(proxy.endpoint.clone());
        }

        if let Some(proxy) = candidates
            .iter()
            .find(|p| p.recovery_eligible(now, self.recovery_time))
        {
            debug!(proxy = %proxy.endpoint.name, "No healthy proxy; retrying recovery-eligible proxy");
            return Some(proxy.endpoint.clone());
        }

        candidates.first().map(|p| p.endpoint.clone())
    }

    pub fn record_success(&self, url: &str, response_time_ms: u64) {
        let now = Instant::now();
        let mut proxies = self.proxies.lock();
        let Some(proxy) = proxies.iter_mut().find(|p| p.endpoint.base_url == url) else {
            return;
        };

        if !proxy.is_healthy {
            info!(proxy = %proxy.endpoint.name, "Proxy recovered");
        }
        proxy.is_healthy = true;
        proxy.consecutive_failures = 0;
        proxy.last_success_at = Some(now);
        let sample = response_time_ms as f64;
        proxy.response_time_ms = Some(match proxy.response_time_ms {
            Some(avg) => avg + RESPONSE_TIME_ALPHA * (sample - avg),
            None => sample,
        });
        crate::metrics::update_proxy_health(&proxy.endpoint.name, true);
    }

    pub fn record_failure(&self, url: &str) {
        let now = Instant::now();
        let mut proxies = self.proxies.lock();
        let Some(proxy) = proxies.iter_mut().find(|p| p.endpoint.base_url == url) else {
            return;
        };

        proxy.consecutive_failures += 1;
        proxy.failure_count += 1;
        proxy.last_failure_at = Some(now);

        if proxy.is_healthy && proxy.consecutive_failures >= self.max_failures {
            proxy.is_healthy = false;
            warn!(
                proxy = %proxy.endpoint.name,
                failures = proxy.consecutive_failures,
                "Proxy marked unhealthy"
            );
            crate::metrics::update_proxy_health(&proxy.endpoint.name, false);
        } else {
            debug!(
                proxy = %proxy.endpoint.name,
                failures = proxy.consecutive_failures,
                "Proxy call failed"
            );
        }
    }

    pub fn health_stats(&self) -> Vec<ProxyHealth> {
        let now = Instant::now();
        self.proxies
            .lock()
            .iter()
            .map(|p| ProxyHealth {
                name: p.endpoint.name.clone(),
                url: p.endpoint.base_url.clone(),
                is_healthy: p.is_healthy,
                consecutive_failures: p.consecutive_failures,
                failure_count: p.failure_count,
                response_time_ms: p.response_time_ms.map(|ms| ms.round() as u64),
                seconds_since_failure: p
                    .last_failure_at
                    .map(|at| now.saturating_duration_since(at).as_secs()),
                seconds_since_success: p
                    .last_success_at
                    .map(|at| now.saturating_duration_since(at).as_secs()),
                recovery_eligible: p.recovery_eligible(now, self.recovery_time),
            })
            .collect()
    }

    /// Forget all failures; every proxy starts healthy again.
    pub fn reset(&self) {
        let mut proxies = self.proxies.lock();
        for proxy in proxies.iter_mut() {
            proxy.is_healthy = true;
            proxy.consecutive_failures = 0;
            proxy.failure_count = 0;
            proxy.last_failure_at = None;
            crate::metrics::update_proxy_health(&proxy.endpoint.name, true);
        }
        debug!("Proxy failure counters reset");
    }

    /// Unhealthy proxies whose recovery window has elapsed.
    pub fn check_candidates(&self) -> Vec<ProxyEndpoint> {
        let now = Instant::now();
        self.proxies
            .lock()
            .iter()
            .filter(|p| p.recovery_eligible(now, self.recovery_time))
            .map(|p| p.endpoint.clone())
            .collect()
    }

    /// Check every recovery-eligible proxy once with a HEAD request.
    ///
    /// Successful checks mark the proxy healthy; failed checks leave its state
    /// untouched. Returns the number of proxies that recovered.
    pub async fn check_once(&self, client: &reqwest::Client, check_target: &str, timeout: Duration) -> usize {
        self.check(client, self.check_candidates(), check_target, timeout).await
    }

    /// Check every configured proxy regardless of state. Used by the CLI.
    pub async fn check_all(&self, client: &reqwest::Client, check_target: &str, timeout: Duration) -> usize {
        let endpoints = self.proxies.lock().iter().map(|p| p.endpoint.clone()).collect();
        self.check(client, endpoints, check_target, timeout).await
    }

    async fn check(
        &self,
        client: &reqwest::Client,
        candidates: Vec<ProxyEndpoint>,
        check_target: &str,
        timeout: Duration,
    ) -> usize {
        if candidates.is_empty() {
            return 0;
        }

        let checks = candidates.into_iter().map(|endpoint| async move {
            let url = endpoint.rewrite(check_target);
            let start = std::time::Instant::now();
            let outcome = client.head(&url).timeout(timeout).send().await;
            (endpoint, outcome, start.elapsed())
        });

        let mut recovered = 0;
        for (endpoint, outcome, elapsed) in futures::future::join_all(checks).await {
            match outcome {
                Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => {
                    self.record_success(&endpoint.base_url, elapsed.as_millis() as u64);
                    recovered += 1;
                }
                Ok(resp) => {
                    debug!(proxy = %endpoint.name, status = %resp.status(), "Proxy health check rejected");
                }
                Err(e) => {
                    debug!(proxy = %endpoint.name, "Proxy health check failed: {}", e);
                }
            }
        }
        recovered
    }

    /// Run [`check_once`](Self::check_once) every `interval` until the task is aborted.
    pub fn spawn_check_loop(
        self: Arc<Self>,
        client: reqwest::Client,
        check_target: String,
        interval: Duration,
        timeout: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let recovered = self.check_once(&client, &check_target, timeout).await;
                if recovered > 0 {
                    info!(recovered, "Background health check restored proxies");
                }
            }
        })
    }
}
