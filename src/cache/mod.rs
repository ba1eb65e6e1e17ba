// Cache module - adaptive in-memory caching
// Author: kelexine (https://github.com/kelexine)

pub mod adaptive;
pub mod models;

pub use adaptive::{eviction_score, AdaptiveCache};
pub use models::{CacheConfig, CacheStats};
