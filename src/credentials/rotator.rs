//! Multi-credential rotation.
//!
//! The `CredentialRotator` spreads API calls across every configured token,
//! always handing out the least-recently-used token that is not exhausted.
//! Exhaustion is tracked per token from the rate-limit headers of failed (and
//! successful) responses and is purely in-memory: a restart makes every token
//! available again.

// Author: kelexine (https://github.com/kelexine)

use super::rate_limit::RateLimitInfo;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// One API token handed out by the rotator.
#[derive(Clone)]
pub struct Credential {
    id: usize,
    label: String,
    token: Zeroizing<String>,
}

// Custom Debug impl that never logs tokens
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl Credential {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Public view of a credential's rotation state.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub id: usize,
    pub label: String,
    pub remaining_quota: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub available: bool,
}

struct CredentialState {
    credential: Credential,
    remaining_quota: Option<u64>,
    exhausted_until: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    /// Rotation sequence of the last hand-out; `0` means never used.
    last_used: u64,
}

impl CredentialState {
    fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.exhausted_until.map_or(true, |until| until <= now)
    }

    fn exhaust_until(&mut self, until: DateTime<Utc>) {
        self.exhausted_until = Some(until);
        self.remaining_quota = Some(0);
    }
}

struct RotatorState {
    slots: Vec<CredentialState>,
    sequence: u64,
}

/// Rotates among interchangeable credentials.
pub struct CredentialRotator {
    state: Mutex<RotatorState>,
    cooldown: chrono::Duration,
}

impl CredentialRotator {
    /// Build a rotator over `tokens`; blank tokens are ignored.
    ///
    /// `cooldown_secs` applies when a credential is rejected without a reset hint.
    pub fn new<I, S>(tokens: I, cooldown_secs: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots: Vec<CredentialState> = tokens
            .into_iter()
            .map(Into::into)
            .filter(|t| !t.trim().is_empty())
            .enumerate()
            .map(|(id, token)| CredentialState {
                credential: Credential {
                    id,
                    label: format!("token-{}", id + 1),
                    token: Zeroizing::new(token.trim().to_string()),
                },
                remaining_quota: None,
                exhausted_until: None,
                consecutive_failures: 0,
                last_used: 0,
            })
            .collect();

        if !slots.is_empty() {
            info!("Credential rotation enabled with {} token(s)", slots.len());
        }
        crate::metrics::update_credentials_available(slots.len());

        Self {
            state: Mutex::new(RotatorState { slots, sequence: 0 }),
            cooldown: chrono::Duration::seconds(cooldown_secs as i64),
        }
    }

    /// A rotator with no credentials.
    pub fn empty() -> Self {
        Self::new(Vec::<String>::new(), 0)
    }

    pub fn has_credentials(&self) -> bool {
        self.count() > 0
    }

    pub fn count(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Credentials usable right now.
    pub fn available_count(&self) -> usize {
        let now = Utc::now();
        self.state
            .lock()
            .slots
            .iter()
            .filter(|s| s.is_available(now))
            .count()
    }

    /// Hand out the least-recently-used credential that is not exhausted.
    ///
    /// Returns `None` when every credential is exhausted; the caller then falls
    /// back to an unauthenticated or server-proxied call.
    pub fn next(&self) -> Option<Credential> {
        let now = Utc::now();
        let mut state = self.state.lock();

        let mut restored = false;
        for slot in state.slots.iter_mut() {
            if matches!(slot.exhausted_until, Some(until) if until <= now) {
                debug!(credential = %slot.credential.label, "Rate-limit window reset; credential available again");
                slot.exhausted_until = None;
                slot.remaining_quota = None;
                restored = true;
            }
        }
        if restored {
            crate::metrics::update_credentials_available(state.slots.iter().filter(|s| s.is_available(now)).count());
        }

        state.sequence += 1;
        let sequence = state.sequence;
        let slot = state
            .slots
            .iter_mut()
            .filter(|s| s.is_available(now))
            .min_by_key(|s| (s.last_used, s.credential.id))?;

        slot.last_used = sequence;
        Some(slot.credential.clone())
    }

    /// Record a failed call made with `credential`.
    ///
    /// 401/403/429 responses that report an empty window exhaust the credential
    /// until the reset time. A 401 without rate-limit hints means the token was
    /// rejected outright; it sits out for the cooldown period.
    pub fn report_failure(&self, credential: &Credential, status: u16, info: &RateLimitInfo) {
        let now = Utc::now();
        let mut state = self.state.lock();
        let cooldown = self.cooldown;
        let Some(slot) = state.slots.get_mut(credential.id) else {
            return;
        };

        slot.consecutive_failures += 1;
        if let Some(remaining) = info.remaining {
            slot.remaining_quota = Some(remaining);
        }

        let rate_limited = matches!(status, 401 | 403 | 429) && info.is_exhausted();
        if rate_limited || status == 429 {
            let until = info
                .reset_time()
                .or_else(|| {
                    info.retry_after
                        .and_then(|d| chrono::Duration::from_std(d).ok())
                        .map(|d| now + d)
                })
                .unwrap_or(now + cooldown);
            slot.exhaust_until(until);
            warn!(
                credential = %slot.credential.label,
                status,
                reset_at = %until,
                "Credential rate limit exhausted; removed from rotation"
            );
        } else if status == 401 {
            slot.exhaust_until(now + cooldown);
            warn!(
                credential = %slot.credential.label,
                failures = slot.consecutive_failures,
                "Credential rejected; cooling down"
            );
        } else {
            debug!(
                credential = %slot.credential.label,
                status,
                failures = slot.consecutive_failures,
                "Credential call failed"
            );
        }

        let available = state.slots.iter().filter(|s| s.is_available(now)).count();
        drop(state);
        crate::metrics::update_credentials_available(available);
    }

    /// Record a successful call; a response that reports an empty window
    /// exhausts the credential proactively.
    pub fn report_success(&self, credential: &Credential, info: &RateLimitInfo) {
        let now = Utc::now();
        let mut state = self.state.lock();
        let cooldown = self.cooldown;
        let Some(slot) = state.slots.get_mut(credential.id) else {
            return;
        };

        slot.consecutive_failures = 0;
        if info.remaining.is_some() {
            slot.remaining_quota = info.remaining;
        }
        if info.is_exhausted() {
            let until = info.reset_time().unwrap_or(now + cooldown);
            slot.exhaust_until(until);
            info!(
                credential = %slot.credential.label,
                reset_at = %until,
                "Credential used its last call in this window"
            );

            let available = state.slots.iter().filter(|s| s.is_available(now)).count();
            drop(state);
            crate::metrics::update_credentials_available(available);
        }
    }

    /// Snapshot of every credential's state.
    pub fn statuses(&self) -> Vec<CredentialStatus> {
        let now = Utc::now();
        self.state
            .lock()
            .slots
            .iter()
            .map(|s| CredentialStatus {
                id: s.credential.id,
                label: s.credential.label.clone(),
                remaining_quota: s.remaining_quota,
                reset_at: s.exhausted_until,
                consecutive_failures: s.consecutive_failures,
                available: s.is_available(now),
            })
            .collect()
    }
}

impl Default for CredentialRotator {
    fn default() -> Self {
        Self::empty()
    }
}
