//! Request coalescing and priority gating.
//!
//! When several callers ask for the same key while a call is still running,
//! only the first one issues the underlying request; the others attach to the
//! in-flight entry and receive a clone of the same result.
//!
//! Design:
//! - **One map, short lock**: a `parking_lot::Mutex<HashMap>` holds the
//!   in-flight entries; it is never held across an `.await`.
//! - **Shared futures**: each entry stores a `futures::future::Shared`, so
//!   every waiter observes the same `Ok` value or the same `Err`.
//! - **Deterministic cleanup**: the entry removes itself when the call
//!   settles. A settle timeout force-resolves calls that never finish, and a
//!   waiter that goes away (e.g. aborted) while nobody else is waiting drops
//!   the entry and with it the underlying request.
//! - **Priority**: `High` requests are issued immediately. `Medium` and `Low`
//!   work is staggered by a short delay and passes through a bounded
//!   semaphore, so background prefetching cannot hold up user-facing calls.

// Author: kelexine (https://github.com/kelexine)

use crate::error::{AccessError, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Scheduling priority of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// Per-request options for [`RequestCoordinator::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub priority: Priority,
    pub dedupe: bool,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: Priority::High,
            dedupe: true,
        }
    }
}

impl EnqueueOptions {
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    pub fn without_dedupe(mut self) -> Self {
        self.dedupe = false;
        self
    }
}

/// Coordinator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// In-flight calls still pending after this long are force-settled with a network error.
    #[serde(default = "default_settle_timeout")]
    pub settle_timeout_secs: u64,
    /// Maximum concurrent `Medium`/`Low` calls.
    #[serde(default = "default_background_concurrency")]
    pub background_concurrency: usize,
    #[serde(default = "default_medium_delay")]
    pub medium_delay_ms: u64,
    #[serde(default = "default_low_delay")]
    pub low_delay_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            settle_timeout_secs: default_settle_timeout(),
            background_concurrency: default_background_concurrency(),
            medium_delay_ms: default_medium_delay(),
            low_delay_ms: default_low_delay(),
        }
    }
}

impl CoordinatorConfig {
    fn stagger(&self, priority: Priority) -> Duration {
        match priority {
            Priority::High => Duration::ZERO,
            Priority::Medium => Duration::from_millis(self.medium_delay_ms),
            Priority::Low => Duration::from_millis(self.low_delay_ms),
        }
    }
}

/// Counters describing coalescing behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStats {
    /// Entries currently in flight.
    pub in_flight: usize,
    /// Underlying calls issued.
    pub issued: u64,
    /// Callers that attached to an existing call.
    pub joined: u64,
    /// Calls force-settled by the settle timeout.
    pub timed_out: u64,
    /// Calls dropped because their last waiter went away.
    pub abandoned: u64,
}

type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

struct InFlight<T: Clone> {
    id: u64,
    priority: Priority,
    future: SharedResult<T>,
}

struct Inner<T: Clone> {
    name: &'static str,
    config: CoordinatorConfig,
    inflight: Mutex<HashMap<String, InFlight<T>>>,
    gate: Arc<Semaphore>,
    next_id: AtomicU64,
    issued: AtomicU64,
    joined: AtomicU64,
    timed_out: AtomicU64,
    abandoned: AtomicU64,
}

impl<T: Clone> Inner<T> {
    /// Remove `key` if it still refers to call `id`.
    fn settle(&self, key: &str, id: u64) {
        let mut inflight = self.inflight.lock();
        if inflight.get(key).map(|e| e.id) == Some(id) {
            inflight.remove(key);
        }
    }

    /// Remove `key` if call `id` has no waiters left besides the map itself.
    fn abandon(&self, key: &str, id: u64) {
        let mut inflight = self.inflight.lock();
        let orphaned = inflight
            .get(key)
            .map(|e| e.id == id && e.future.strong_count() == Some(1))
            .unwrap_or(false);
        if orphaned {
            inflight.remove(key);
            drop(inflight);
            self.abandoned.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_coalesced(self.name, "abandoned");
            debug!(coordinator = self.name, key, "Last waiter left; in-flight call dropped");
        }
    }
}

/// Drops the in-flight entry when a waiter is cancelled while nobody else waits.
struct WaiterGuard<'a, T: Clone> {
    inner: &'a Inner<T>,
    key: String,
    id: u64,
    future: Option<SharedResult<T>>,
}

impl<T: Clone> Drop for WaiterGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(future) = self.future.take() {
            drop(future);
            self.inner.abandon(&self.key, self.id);
        }
    }
}

/// Deduplicates concurrent identical requests. Cheap to clone.
pub struct RequestCoordinator<T: Clone> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone> Clone for RequestCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> RequestCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, config: CoordinatorConfig) -> Self {
        let permits = config.background_concurrency.max(1);
        Self {
            inner: Arc::new(Inner {
                name,
                config,
                inflight: Mutex::new(HashMap::new()),
                gate: Arc::new(Semaphore::new(permits)),
                next_id: AtomicU64::new(1),
                issued: AtomicU64::new(0),
                joined: AtomicU64::new(0),
                timed_out: AtomicU64::new(0),
                abandoned: AtomicU64::new(0),
            }),
        }
    }

    /// Run `issue` for `key`, or attach to the call already running for it.
    ///
    /// `issue` is only invoked when this caller becomes the issuer. Every
    /// caller attached to the same call receives a clone of its result.
    pub async fn enqueue<F, Fut>(&self, key: impl Into<String>, options: EnqueueOptions, issue: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = key.into();
        let (id, future) = {
            let mut inflight = self.inner.inflight.lock();
            match inflight.get(&key).filter(|_| options.dedupe) {
                Some(existing) => {
                    self.inner.joined.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::record_coalesced(self.inner.name, "joined");
                    debug!(
                        coordinator = self.inner.name,
                        key = %key,
                        in_flight_priority = existing.priority.as_str(),
                        "Joined in-flight request"
                    );
                    (existing.id, existing.future.clone())
                }
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = self.issue_future(key.clone(), id, options.priority, issue);
                    if options.dedupe {
                        inflight.insert(
                            key.clone(),
                            InFlight {
                                id,
                                priority: options.priority,
                                future: future.clone(),
                            },
                        );
                    }
                    self.inner.issued.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::record_coalesced(self.inner.name, "issued");
                    (id, future)
                }
            }
        };

        let mut guard = WaiterGuard {
            inner: &self.inner,
            key,
            id,
            future: Some(future),
        };
        let result = match guard.future.as_mut() {
            Some(future) => future.await,
            None => Err(AccessError::Internal("in-flight future missing".to_string())),
        };
        guard.future = None;
        result
    }

    fn issue_future<F, Fut>(&self, key: String, id: u64, priority: Priority, issue: F) -> SharedResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        let gate = self.inner.gate.clone();
        let stagger = self.inner.config.stagger(priority);
        let settle_timeout = Duration::from_secs(self.inner.config.settle_timeout_secs.max(1));
        let name = self.inner.name;

        async move {
            let _permit = if priority == Priority::High {
                None
            } else {
                tokio::time::sleep(stagger).await;
                gate.acquire_owned().await.ok()
            };

            let result = match tokio::time::timeout(settle_timeout, issue()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        coordinator = name,
                        key = %key,
                        timeout_secs = settle_timeout.as_secs(),
                        "In-flight request never settled; forcing failure"
                    );
                    if let Some(inner) = weak.upgrade() {
                        inner.timed_out.fetch_add(1, Ordering::Relaxed);
                    }
                    crate::metrics::record_coalesced(name, "timeout");
                    Err(AccessError::Network(format!(
                        "request for '{}' did not settle within {}s",
                        key,
                        settle_timeout.as_secs()
                    )))
                }
            };

            if let Some(inner) = weak.upgrade() {
                inner.settle(&key, id);
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Forget every in-flight entry. Running calls still resolve their current
    /// waiters but can no longer be joined.
    pub fn clear(&self) {
        let mut inflight = self.inner.inflight.lock();
        let count = inflight.len();
        inflight.clear();
        debug!(coordinator = self.inner.name, count, "In-flight table cleared");
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.inflight.lock().contains_key(key)
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            in_flight: self.inner.inflight.lock().len(),
            issued: self.inner.issued.load(Ordering::Relaxed),
            joined: self.inner.joined.load(Ordering::Relaxed),
            timed_out: self.inner.timed_out.load(Ordering::Relaxed),
            abandoned: self.inner.abandoned.load(Ordering::Relaxed),
        }
    }
}

fn default_settle_timeout() -> u64 {
    30
}

fn default_background_concurrency() -> usize {
    4
}

fn default_medium_delay() -> u64 {
    50
}

fn default_low_delay() -> u64 {
    150
}
