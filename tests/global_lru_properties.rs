// ==============================================
// GLOBAL LRU SINGLE-THREADED PROPERTIES (integration)
// ==============================================
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use globalru::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn build(max: u64, concurrency_level: usize) -> GlobalLruCache<String, u64> {
    GlobalLruBuilder::new(max)
        .concurrency_level(concurrency_level)
        .thread_local_buffer_capacity(16)
        .try_build()
        .unwrap()
}

/// One single-segment striped cache and one buffered cache: both give exact
/// LRU order on a single thread.
fn exact_lru_caches(max: u64) -> [GlobalLruCache<String, u64>; 2] {
    [build(max, 1), build(max, 0)]
}

fn key(k: &str) -> String {
    k.to_string()
}

mod lru_order {
    use super::*;

    #[test]
    fn oldest_of_three_is_evicted() {
        for cache in exact_lru_caches(2) {
            cache.put(key("A"), 1, 1).unwrap();
            cache.put(key("B"), 2, 1).unwrap();
            cache.put(key("C"), 3, 1).unwrap();

            assert!(!cache.contains(&key("A")));
            assert!(cache.contains(&key("B")));
            assert!(cache.contains(&key("C")));
            assert_eq!(cache.bytes_used(), 2);
        }
    }

    #[test]
    fn get_protects_entry_from_next_eviction() {
        for cache in exact_lru_caches(2) {
            cache.put(key("B"), 2, 1).unwrap();
            cache.get(&key("B"));
            cache.put(key("C"), 3, 1).unwrap();
            // B has to be touched after C to outrank it.
            cache.get(&key("B"));
            cache.put(key("D"), 4, 1).unwrap();

            assert!(cache.contains(&key("B")));
            assert!(!cache.contains(&key("C")));
            assert!(cache.contains(&key("D")));
        }
    }

    #[test]
    fn update_counts_as_a_touch() {
        for cache in exact_lru_caches(3) {
            for k in ["a", "b", "c"] {
                cache.put(key(k), 0, 1).unwrap();
            }
            cache.put(key("a"), 9, 1).unwrap();
            cache.put(key("d"), 0, 1).unwrap();

            assert!(!cache.contains(&key("b")));
            assert_eq!(cache.get(&key("a")).as_deref(), Some(&9));
        }
    }

    #[test]
    fn many_segments_still_merge_by_recency() {
        let cache = build(8, 8);
        for k in 0..8u64 {
            cache.put(k.to_string(), k, 1).unwrap();
        }
        for k in (0..8u64).step_by(2) {
            cache.get(&k.to_string());
        }
        for k in 8..12u64 {
            cache.put(k.to_string(), k, 1).unwrap();
        }
        for k in [1u64, 3, 5, 7] {
            assert!(!cache.contains(&k.to_string()), "odd key {k} should be gone");
        }
        for k in [0u64, 2, 4, 6] {
            assert!(cache.contains(&k.to_string()), "even key {k} should remain");
        }
    }
}

mod accounting {
    use super::*;

    #[test]
    fn remove_of_absent_key_is_a_no_op() {
        for cache in exact_lru_caches(100) {
            cache.put(key("present"), 1, 10).unwrap();
            let before = (cache.bytes_used(), cache.len());

            assert_eq!(cache.remove(&key("absent")), None);
            assert_eq!((cache.bytes_used(), cache.len()), before);
            assert_eq!(cache.remove(&key("present")).as_deref(), Some(&1));
            assert_eq!(cache.remove(&key("present")), None);
            assert_eq!(cache.bytes_used(), 0);
        }
    }

    #[test]
    fn min_cleared_evicts_past_the_overshoot() {
        let cache: GlobalLruCache<u32, ()> = GlobalLruBuilder::new(10)
            .min_cleared(4)
            .concurrency_level(1)
            .try_build()
            .unwrap();
        for k in 0..10 {
            cache.put(k, (), 1).unwrap();
        }
        let insertion = cache.put(10, (), 1).unwrap();
        let report = insertion.eviction.unwrap();
        assert_eq!(report.target, 5);
        assert_eq!(report.evicted, 5);
        assert_eq!(cache.bytes_used(), 6);
        assert_eq!(cache.len(), 6);
    }

    #[test]
    fn randomized_sequence_keeps_bytes_exact() {
        for concurrency_level in [0, 1, 4] {
            let mut rng = SmallRng::seed_from_u64(0x5eed + concurrency_level as u64);
            let cache = build(500, concurrency_level);
            let mut model: HashMap<String, u64> = HashMap::new();

            for _ in 0..5_000 {
                let k = format!("k{}", rng.random_range(0..120));
                match rng.random_range(0..10) {
                    0..=4 => {
                        let size = rng.random_range(1..40);
                        let insertion = cache.put(k.clone(), size, size).unwrap();
                        assert!(cache.bytes_used() <= 500 || insertion.is_short());
                    },
                    5..=7 => {
                        cache.get(&k);
                    },
                    _ => {
                        cache.remove(&k);
                    },
                }
                // Reconcile the model with whatever eviction dropped.
                model.clear();
                for i in 0..120 {
                    let probe = format!("k{i}");
                    if let Some(size) = cache.peek(&probe) {
                        model.insert(probe, *size);
                    }
                }
                assert_eq!(cache.bytes_used(), model.values().sum::<u64>());
                assert_eq!(cache.len(), model.len());
            }
            cache.check_invariants().unwrap();
        }
    }
}

mod overflow {
    use super::*;

    #[test]
    fn admitted_entry_larger_than_budget_reports_shortfall() {
        let cache = build(10, 2);
        cache.put(key("small"), 1, 3).unwrap();
        let insertion = cache.put(key("huge"), 2, 25).unwrap();

        let report = insertion.eviction.unwrap();
        assert!(report.is_short());
        assert_eq!(report.shortfall(), 15);
        assert!(cache.contains(&key("huge")));
        assert_eq!(cache.stats().shortfalls, 1);

        // The next put evicts the oversized entry.
        cache.put(key("next"), 3, 1).unwrap();
        assert!(!cache.contains(&key("huge")));
        assert_eq!(cache.bytes_used(), 1);
    }

    #[test]
    fn oversized_update_is_refused_and_old_value_kept() {
        let cache: GlobalLruCache<String, u64> = GlobalLruBuilder::new(10)
            .concurrency_level(0)
            .overflow(OverflowPolicy::Reject)
            .try_build()
            .unwrap();
        cache.put(key("a"), 1, 5).unwrap();

        let err = cache.put(key("a"), 2, 50).unwrap_err();
        match err {
            CacheError::BudgetExceeded {
                requested, maximum, ..
            } => {
                assert_eq!(requested, 50);
                assert_eq!(maximum, 10);
            },
            CacheError::Supplier(never) => match never {},
        }
        assert_eq!(cache.peek(&key("a")).as_deref(), Some(&1));
        assert_eq!(cache.bytes_used(), 5);
        assert_eq!(cache.stats().rejected_puts, 1);
        cache.check_invariants().unwrap();
    }
}

mod listener {
    use super::*;

    fn counting_cache(
        max: u64,
        concurrency_level: usize,
        fail_every: usize,
    ) -> (GlobalLruCache<u32, u32>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = GlobalLruBuilder::new(max)
            .concurrency_level(concurrency_level)
            .try_build_with_listener(move |_: &u32, _: &Arc<u32>| -> Result<(), ListenerError> {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if fail_every > 0 && n % fail_every == 0 {
                    return Err(format!("write-back {n} failed").into());
                }
                Ok(())
            })
            .unwrap();
        (cache, calls)
    }

    #[test]
    fn listener_calls_equal_policy_evictions() {
        for concurrency_level in [0, 3] {
            let (cache, calls) = counting_cache(20, concurrency_level, 0);
            for k in 0..100 {
                cache.put(k, k, 2).unwrap();
                if k % 7 == 0 {
                    cache.remove(&(k / 2));
                }
            }
            let stats = cache.stats();
            assert_eq!(calls.load(Ordering::SeqCst) as u64, stats.evictions);
            assert_eq!(stats.evictions + stats.removes + cache.len() as u64, 100);
        }
    }

    #[test]
    fn failing_listener_still_reclaims() {
        let (cache, calls) = counting_cache(4, 1, 2);
        for k in 0..10 {
            cache.put(k, k, 1).unwrap();
            assert!(cache.bytes_used() <= 4);
        }
        let stats = cache.stats();
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(stats.evictions, 6);
        assert_eq!(stats.listener_failures, 3);
    }
}
