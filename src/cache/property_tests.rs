//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the tier invariants over generated operation
//! sequences.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use crate::backend::{MemoryBulkStorage, MemoryStorage};
use crate::cache::{
    estimate_size, BulkStore, CacheManager, MemoryTier, PersistentStore, Tier, VolatileStore,
};
use crate::config::{merge_config, CacheConfig, CacheConfigPatch};

// == Test Configuration ==
const TEST_MAX_ENTRIES: usize = 100;
const TEST_TTL_MS: u64 = 300_000;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn memory_only(max_entries: usize) -> CacheConfig {
    CacheConfig {
        max_memory_entries: max_entries,
        enable_persistence: false,
        enable_bulk_store: false,
        ..CacheConfig::default()
    }
}

// == Strategies ==
/// Generates valid cache keys (non-empty, within length limit)
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{1,64}"
}

fn valid_value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{1,256}"
}

/// Generates nested JSON documents
fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,32}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("[a-z]{1,8}", inner, 0..4)
                .prop_map(|map| json!(map)),
        ]
    })
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    // A small key space so gets and deletes actually hit
    let key = "[a-e]";
    prop_oneof![
        (key, valid_value_strategy()).prop_map(|(key, value)| CacheOp::Set { key, value }),
        key.prop_map(|key| CacheOp::Get { key }),
        key.prop_map(|key| CacheOp::Delete { key }),
    ]
}

/// Deduplicates while keeping first-seen order.
fn unique(keys: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.into_iter().filter(|key| seen.insert(key.clone())).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Every probe of the memory tier is counted exactly once as a hit or miss,
    // and the entry count mirrors a model of live keys.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..50)) {
        let cache = CacheManager::new(memory_only(TEST_MAX_ENTRIES));
        let mut model: HashSet<String> = HashSet::new();
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        tokio_test::block_on(async {
            for op in ops {
                match op {
                    CacheOp::Set { key, value } => {
                        cache.set(&key, &value, None).await;
                        model.insert(key);
                    }
                    CacheOp::Get { key } => {
                        let hit = cache.get::<String>(&key).await.is_some();
                        prop_assert_eq!(hit, model.contains(&key));
                        if hit {
                            expected_hits += 1;
                        } else {
                            expected_misses += 1;
                        }
                    }
                    CacheOp::Delete { key } => {
                        let existed = cache.delete(&key).await;
                        prop_assert_eq!(existed, model.remove(&key));
                    }
                }
            }
            Ok(())
        })?;

        let stats = cache.stats();
        prop_assert_eq!(stats.memory_hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(stats.memory_misses, expected_misses, "Misses mismatch");
        prop_assert_eq!(stats.entry_count, model.len(), "Entry count mismatch");
    }

    // After every set, both budgets hold as long as no single value is larger
    // than the byte budget.
    #[test]
    fn prop_capacity_invariant(
        entries in prop::collection::vec(
            (valid_key_strategy(), valid_value_strategy()),
            1..200
        ),
        max_entries in 1usize..30
    ) {
        let max_size = 4 * 1024;
        let mut store: VolatileStore<String> = VolatileStore::new(max_size, max_entries);

        for (key, value) in entries {
            store.set(&key, value, TEST_TTL_MS);
            prop_assert!(store.len() <= max_entries, "{} entries exceed {}", store.len(), max_entries);
            prop_assert!(store.total_size() <= max_size, "{} bytes exceed {}", store.total_size(), max_size);
        }
    }

    // The running total equals the sum of held entry sizes after any mix of
    // writes, overwrites and deletes.
    #[test]
    fn prop_running_size_matches_entries(ops in prop::collection::vec(cache_op_strategy(), 1..80)) {
        let mut store: VolatileStore<String> = VolatileStore::new(2 * 1024, 4);

        for op in ops {
            match op {
                CacheOp::Set { key, value } => store.set(&key, value, TEST_TTL_MS),
                CacheOp::Get { key } => {
                    store.get(&key);
                }
                CacheOp::Delete { key } => {
                    store.delete(&key);
                }
            }
        }

        let summed: usize = store
            .keys()
            .iter()
            .filter_map(|key| store.get_entry(key))
            .map(|entry| entry.size)
            .sum();
        prop_assert_eq!(store.total_size(), summed);
    }

    // Storing a JSON document and reading it back returns an equal document,
    // in each tier on its own.
    #[test]
    fn prop_roundtrip_every_tier(key in valid_key_strategy(), value in json_strategy()) {
        let memory = MemoryTier::new(usize::MAX / 2, TEST_MAX_ENTRIES);
        let persistent = PersistentStore::new(Arc::new(MemoryStorage::new()), "prop_", 0.25);
        let bulk = BulkStore::new(Arc::new(MemoryBulkStorage::new()), Duration::from_secs(1));
        let tiers: [&dyn Tier; 3] = [&memory, &persistent, &bulk];

        runtime().block_on(async {
            for tier in tiers {
                tier.put(&key, value.clone(), TEST_TTL_MS).await;
                let entry = tier.get_entry(&key).await;
                prop_assert!(entry.is_some(), "{} tier lost the entry", tier.kind());
                let entry = entry.unwrap();
                prop_assert_eq!(&entry.data, &value);
                prop_assert_eq!(entry.size, estimate_size(&value));
            }
            Ok(())
        })?;
    }

    // Merging never lets the eviction ratio leave [0, 1] and never touches
    // fields the patch leaves out.
    #[test]
    fn prop_merge_config_clamps_and_preserves(
        ratio in proptest::option::of(-10.0f64..10.0),
        entries in proptest::option::of(0usize..10_000)
    ) {
        let base = CacheConfig::default();
        let patch = CacheConfigPatch {
            quota_eviction_ratio: ratio,
            max_memory_entries: entries,
            ..CacheConfigPatch::default()
        };

        let merged = merge_config(&base, &patch);

        prop_assert!((0.0..=1.0).contains(&merged.quota_eviction_ratio));
        prop_assert_eq!(merged.max_memory_entries, entries.unwrap_or(base.max_memory_entries));
        prop_assert_eq!(merged.default_ttl_ms, base.default_ttl_ms);
        prop_assert_eq!(merged.namespace, base.namespace);
    }
}

// Separate proptest block with fewer cases for time-sensitive TTL tests
proptest! {
    #![proptest_config(ProptestConfig::with_cases(5))]

    // A value is readable before its deadline and gone once it has passed.
    #[test]
    fn prop_ttl_expiration_behavior(
        key in valid_key_strategy(),
        value in valid_value_strategy()
    ) {
        let mut store: VolatileStore<String> = VolatileStore::new(usize::MAX / 2, TEST_MAX_ENTRIES);

        store.set(&key, value.clone(), 100);
        prop_assert_eq!(store.get(&key), Some(value), "Value should match before expiration");

        sleep(Duration::from_millis(150));

        prop_assert_eq!(store.get(&key), None, "Entry should be gone after its TTL");
        prop_assert_eq!(store.total_size(), 0);
    }
}

// Property tests for LRU eviction behavior
proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Filling the store to capacity and adding one more key evicts the key
    // that was written first.
    #[test]
    fn prop_lru_eviction_order(
        initial_keys in prop::collection::vec(valid_key_strategy(), 3..10),
        new_key in valid_key_strategy(),
        new_value in valid_value_strategy()
    ) {
        let unique_keys = unique(initial_keys);
        prop_assume!(unique_keys.len() >= 2);
        prop_assume!(!unique_keys.contains(&new_key));

        let capacity = unique_keys.len();
        let mut store: VolatileStore<String> = VolatileStore::new(usize::MAX / 2, capacity);

        for key in &unique_keys {
            store.set(key, format!("value_{}", key), TEST_TTL_MS);
        }
        prop_assert_eq!(store.len(), capacity, "Store should be at capacity");

        store.set(&new_key, new_value, TEST_TTL_MS);

        prop_assert_eq!(store.len(), capacity, "Store should remain at capacity after eviction");
        prop_assert!(!store.has(&unique_keys[0]), "Oldest key '{}' should have been evicted", unique_keys[0]);
        prop_assert!(store.has(&new_key));
        for key in unique_keys.iter().skip(1) {
            prop_assert!(store.has(key), "Key '{}' should still exist", key);
        }
    }

    // Reading the oldest key makes it most recent, so the next oldest is
    // evicted instead.
    #[test]
    fn prop_lru_access_tracking(
        keys in prop::collection::vec(valid_key_strategy(), 3..8),
        new_key in valid_key_strategy(),
        new_value in valid_value_strategy()
    ) {
        let unique_keys = unique(keys);
        prop_assume!(unique_keys.len() >= 3);
        prop_assume!(!unique_keys.contains(&new_key));

        let capacity = unique_keys.len();
        let mut store: VolatileStore<String> = VolatileStore::new(usize::MAX / 2, capacity);

        for key in &unique_keys {
            store.set(key, format!("value_{}", key), TEST_TTL_MS);
        }

        let accessed_key = &unique_keys[0];
        store.get(accessed_key);
        let expected_evicted = &unique_keys[1];

        store.set(&new_key, new_value, TEST_TTL_MS);

        prop_assert!(store.has(accessed_key), "Accessed key '{}' should not be evicted", accessed_key);
        prop_assert!(!store.has(expected_evicted), "Key '{}' should have been evicted", expected_evicted);
        prop_assert!(store.has(&new_key), "New key should exist");
    }
}

// == Property Test for Error Response Format ==
proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    // Every error variant renders as JSON with a string "error" field.
    #[test]
    fn prop_error_response_format(error_msg in "[a-zA-Z0-9 _-]{1,100}") {
        use crate::error::CacheError;
        use axum::body::to_bytes;
        use axum::response::IntoResponse;

        let error_variants = vec![
            CacheError::NotFound(error_msg.clone()),
            CacheError::InvalidRequest(error_msg.clone()),
            CacheError::Corrupt(error_msg.clone()),
            CacheError::QuotaExceeded(error_msg.clone()),
            CacheError::Unavailable(error_msg.clone()),
            CacheError::Internal(error_msg.clone()),
        ];
        let rt = runtime();

        for error in error_variants {
            let expected_msg = error.to_string();
            let response = error.into_response();

            let content_type = response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok());
            prop_assert!(
                content_type.map(|ct| ct.contains("application/json")).unwrap_or(false),
                "Response should have JSON content-type"
            );

            let bytes = rt.block_on(async { to_bytes(response.into_body(), usize::MAX).await.unwrap() });
            let json: Value = serde_json::from_slice(&bytes).expect("Response body should be valid JSON");

            prop_assert_eq!(json["error"].as_str(), Some(expected_msg.as_str()));
        }
    }
}

// == Property Test for Concurrent Operation Correctness ==
proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    // Interleaved tasks sharing one manager never break the entry budget, and
    // every value read back is one that some task wrote for that key.
    #[test]
    fn prop_concurrent_operation_correctness(
        operations in prop::collection::vec(cache_op_strategy(), 10..50),
        max_entries in 1usize..5
    ) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        let mut written: HashMap<String, HashSet<String>> = HashMap::new();
        for op in &operations {
            if let CacheOp::Set { key, value } = op {
                written.entry(key.clone()).or_default().insert(value.clone());
            }
        }

        rt.block_on(async {
            let cache = Arc::new(CacheManager::new(memory_only(max_entries)));
            let written = Arc::new(written);

            let mut handles = vec![];
            for op in operations {
                let cache = Arc::clone(&cache);
                let written = Arc::clone(&written);

                handles.push(tokio::spawn(async move {
                    match op {
                        CacheOp::Set { key, value } => {
                            cache.set(&key, &value, None).await;
                            Ok(())
                        }
                        CacheOp::Get { key } => match cache.get::<String>(&key).await {
                            Some(value) if !written.get(&key).is_some_and(|vals| vals.contains(&value)) => {
                                Err(format!("read unexpected value for '{}'", key))
                            }
                            _ => Ok(()),
                        },
                        CacheOp::Delete { key } => {
                            cache.delete(&key).await;
                            Ok(())
                        }
                    }
                }));
            }

            for handle in handles {
                let result = handle.await.expect("Task should not panic");
                prop_assert!(result.is_ok(), "Concurrent operation failed: {:?}", result);
            }

            let stats = cache.stats();
            prop_assert!(stats.entry_count <= max_entries, "Cache should not exceed max entries");
            prop_assert!((0.0..=1.0).contains(&stats.hit_rate));
            Ok(())
        })?;
    }
}
