//! Cache configuration and statistics models.

// Author: kelexine (https://github.com/kelexine)

use serde::{Deserialize, Serialize};

/// Configuration for one adaptive cache instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Hard upper bound on the number of live entries.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Fraction of `max_size` at which a cleanup pass runs before inserting a new key.
    #[serde(default = "default_cleanup_threshold")]
    pub cleanup_threshold: f64,
    /// Fraction of the current entries removed by one cleanup pass.
    #[serde(default = "default_cleanup_ratio")]
    pub cleanup_ratio: f64,
    /// Weight applied to an entry's hit count when scoring.
    #[serde(default = "default_weight")]
    pub frequency_weight: f64,
    /// Weight applied to an entry's age (in minutes) when scoring.
    #[serde(default = "default_time_weight")]
    pub time_weight: f64,
    /// Entries untouched for longer than this are treated as absent.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

impl Default for CacheConfig {
    /// Provides default values for cache configuration.
    ///
    /// - `max_size`: 200
    /// - `cleanup_threshold`: 0.8
    /// - `cleanup_ratio`: 0.25
    /// - `frequency_weight`: 1.0
    /// - `time_weight`: 0.1
    /// - `ttl_seconds`: none
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            cleanup_threshold: default_cleanup_threshold(),
            cleanup_ratio: default_cleanup_ratio(),
            frequency_weight: default_weight(),
            time_weight: default_time_weight(),
            ttl_seconds: None,
        }
    }
}

impl CacheConfig {
    /// Same defaults with a TTL attached.
    pub fn with_ttl(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds: Some(ttl_seconds),
            ..Self::default()
        }
    }

    /// Clamp ratios into `(0, 1]` and the size into `>= 1`.
    pub(crate) fn normalized(mut self) -> Self {
        self.max_size = self.max_size.max(1);
        self.cleanup_threshold = clamp_unit(self.cleanup_threshold, default_cleanup_threshold());
        self.cleanup_ratio = clamp_unit(self.cleanup_ratio, default_cleanup_ratio());
        self
    }
}

fn clamp_unit(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value.min(1.0)
    } else {
        fallback
    }
}

/// Snapshot of one cache's state.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of live entries.
    pub size: usize,
    /// Configured capacity.
    pub max_size: usize,
    /// Fraction of lookups that found a live entry (0.0 when nothing was looked up).
    pub hit_rate: f64,
    /// Sum of hit counts across live entries.
    pub total_hits: u64,
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Entries removed by cleanup or TTL expiry.
    pub evictions: u64,
}

fn default_max_size() -> usize {
    200
}

fn default_cleanup_threshold() -> f64 {
    0.8
}

fn default_cleanup_ratio() -> f64 {
    0.25
}

fn default_weight() -> f64 {
    1.0
}

fn default_time_weight() -> f64 {
    0.1
}
