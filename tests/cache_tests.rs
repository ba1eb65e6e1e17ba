// Adaptive cache tests - testing only public APIs
// Author: kelexine (https://github.com/kelexine)

use proptest::prelude::*;
use repolens::cache::{eviction_score, AdaptiveCache, CacheConfig};
use std::time::Duration;
use tokio::time::Instant;

fn scenario_config() -> CacheConfig {
    CacheConfig {
        max_size: 4,
        cleanup_threshold: 0.75,
        cleanup_ratio: 0.5,
        ..CacheConfig::default()
    }
}

#[test]
fn test_cache_config_defaults() {
    let config = CacheConfig::default();

    assert_eq!(config.max_size, 200);
    assert_eq!(config.cleanup_threshold, 0.8);
    assert_eq!(config.cleanup_ratio, 0.25);
    assert!(config.ttl_seconds.is_none());
}

#[test]
fn test_frequently_read_key_survives_cleanup() {
    let cache: AdaptiveCache<String, u32> = AdaptiveCache::new("scenario", scenario_config());
    cache.set("A".to_string(), 1);
    cache.set("B".to_string(), 2);
    cache.set("C".to_string(), 3);
    assert_eq!(cache.get("A"), Some(1));
    assert_eq!(cache.get("A"), Some(1));

    // size 3 >= 4 * 0.75, so inserting D cleans up first
    cache.set("D".to_string(), 4);

    assert!(cache.has("A"));
    assert!(cache.has("D"));
    assert!(!cache.has("B"));
    assert!(!cache.has("C"));
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_stats_track_lookups() {
    let cache: AdaptiveCache<String, u32> = AdaptiveCache::new("stats", CacheConfig::default());
    cache.set("a".to_string(), 1);
    let _ = cache.get("a");
    let _ = cache.get("missing");

    let stats = cache.stats();
    assert_eq!(stats.size, 1);
    assert_eq!(stats.max_size, 200);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
}

#[test]
fn test_score_prefers_frequency_and_recency() {
    assert!(eviction_score(10, 0.0, 1.0, 0.1) > eviction_score(1, 0.0, 1.0, 0.1));
    assert!(eviction_score(5, 0.0, 1.0, 0.1) > eviction_score(5, 30.0, 1.0, 0.1));
}

#[derive(Debug, Clone)]
enum Op {
    Set(u8),
    Get(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(0u8..32).prop_map(Op::Set), (0u8..32).prop_map(Op::Get)]
}

proptest! {
    #[test]
    fn size_never_exceeds_max(
        max_size in 1usize..16,
        threshold in 0.1f64..1.0,
        ratio in 0.1f64..1.0,
        ops in proptest::collection::vec(op(), 1..200),
    ) {
        let cache: AdaptiveCache<u8, u8> = AdaptiveCache::new("prop", CacheConfig {
            max_size,
            cleanup_threshold: threshold,
            cleanup_ratio: ratio,
            ..CacheConfig::default()
        });

        for op in ops {
            match op {
                Op::Set(k) => cache.set(k, k),
                Op::Get(k) => { let _ = cache.get(&k); }
            }
            prop_assert!(cache.len() <= max_size);
        }
    }
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn cleanup_evicts_lowest_scores_first(
        ratio in 0.1f64..1.0,
        insert_gaps in proptest::collection::vec(0u64..600, 2..12),
        reads in proptest::collection::vec((0usize..12, 0u64..600), 0..40),
        final_gap in 0u64..600,
    ) {
        let max_size = insert_gaps.len();
        let config = CacheConfig {
            max_size,
            cleanup_threshold: 1.0,
            cleanup_ratio: ratio,
            ..CacheConfig::default()
        };

        paused_runtime().block_on(async {
            let cache: AdaptiveCache<usize, usize> = AdaptiveCache::new("order", config.clone());
            let mut hits = vec![0u64; max_size];
            let mut touched = vec![Instant::now(); max_size];

            for (key, gap) in insert_gaps.iter().enumerate() {
                tokio::time::advance(Duration::from_secs(*gap)).await;
                cache.set(key, key);
                hits[key] = 1;
                touched[key] = Instant::now();
            }
            for (key, gap) in &reads {
                let key = key % max_size;
                tokio::time::advance(Duration::from_secs(*gap)).await;
                prop_assert_eq!(cache.get(&key), Some(key));
                hits[key] += 1;
                touched[key] = Instant::now();
            }
            tokio::time::advance(Duration::from_secs(final_gap)).await;

            // Scores as they stand when the next insert triggers cleanup
            let now = Instant::now();
            let scores: Vec<f64> = (0..max_size)
                .map(|key| {
                    let age_minutes = now.duration_since(touched[key]).as_secs_f64() / 60.0;
                    eviction_score(hits[key], age_minutes, config.frequency_weight, config.time_weight)
                })
                .collect();

            cache.set(max_size, max_size);
            prop_assert!(cache.has(&max_size));

            let (retained, evicted): (Vec<usize>, Vec<usize>) = (0..max_size).partition(|key| cache.has(key));
            let expected = ((max_size as f64 * ratio).ceil() as usize).clamp(1, max_size);
            prop_assert_eq!(evicted.len(), expected);

            let highest_evicted = evicted.iter().map(|k| scores[*k]).fold(f64::MIN, f64::max);
            let lowest_retained = retained.iter().map(|k| scores[*k]).fold(f64::MAX, f64::min);
            prop_assert!(
                highest_evicted <= lowest_retained,
                "evicted score {} above retained score {}",
                highest_evicted,
                lowest_retained
            );
            Ok(())
        })?;
    }
}
