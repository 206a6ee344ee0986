//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 双层存储集成测试

#[path = "../common/mod.rs"]
mod common;

use common::{generate_unique_namespace, manual_store, memory_store, setup_logging};
use serde_json::json;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tiercache::backend::{DurableStore, MemoryDurableStore};
use tiercache::metrics::{get_metrics_string, GLOBAL_METRICS};
use tiercache::{CacheError, DualTierStore, StoreOptions};

#[tokio::test]
async fn test_set_then_get_round_trip() {
    setup_logging();
    let (store, durable) = memory_store("warm", Duration::from_secs(60));

    store
        .set("buildings", json!([{"id": 1, "name": "A"}]), None)
        .await
        .unwrap();

    assert_eq!(
        store.get("buildings").await.unwrap(),
        Some(json!([{"id": 1, "name": "A"}]))
    );
    // 持久层同样写入
    assert!(durable.raw(&store.durable_key("buildings")).is_some());
}

/// TTL 为 0 的条目立即过期，读取时从两层删除
#[tokio::test]
async fn test_zero_ttl_is_evicted_from_both_tiers() {
    setup_logging();
    let durable = MemoryDurableStore::new();
    let (store, clock) = manual_store(
        "instant",
        Duration::from_secs(30),
        Arc::new(durable.clone()),
    );

    store
        .set("issues", json!([1]), Some(Duration::ZERO))
        .await
        .unwrap();
    assert!(durable.raw(&store.durable_key("issues")).is_some());

    clock.advance(Duration::from_millis(1));
    assert_eq!(store.get("issues").await.unwrap(), None);
    assert!(!store.l1().contains("issues"));
    assert!(durable.raw(&store.durable_key("issues")).is_none());
}

#[tokio::test]
async fn test_entry_expires_after_ttl() {
    let (store, clock) = manual_store(
        "warm",
        Duration::from_secs(300),
        Arc::new(MemoryDurableStore::new()),
    );

    store.set("summary", json!({"ok": true}), None).await.unwrap();

    clock.advance(Duration::from_secs(299));
    assert!(store.get("summary").await.unwrap().is_some());

    clock.advance(Duration::from_secs(1));
    assert_eq!(store.get("summary").await.unwrap(), None);
}

/// 新实例（模拟页面重载）从持久层读取并提升到易失层
#[tokio::test]
async fn test_promotion_after_reload() {
    setup_logging();
    let durable = MemoryDurableStore::new();
    let options = StoreOptions::new("warm", Duration::from_secs(300));

    let first = DualTierStore::new(options.clone(), Arc::new(durable.clone()));
    first.set("buildings", json!([1, 2, 3]), None).await.unwrap();
    drop(first);

    let reloaded = DualTierStore::new(options, Arc::new(durable.clone()));
    assert!(!reloaded.l1().contains("buildings"));

    assert_eq!(
        reloaded.get("buildings").await.unwrap(),
        Some(json!([1, 2, 3]))
    );
    assert!(reloaded.l1().contains("buildings"));
}

/// 持久层配额耗尽时仍可从易失层读取
#[tokio::test]
async fn test_quota_exceeded_degrades_to_volatile() {
    setup_logging();
    let durable = MemoryDurableStore::with_quota(200);
    let store = DualTierStore::new(
        StoreOptions::new("warm", Duration::from_secs(60)),
        Arc::new(durable.clone()),
    );

    store.set("big", json!([1]), None).await.unwrap();
    assert_eq!(durable.len(), 1);

    let large = json!([{"payload": "x".repeat(512)}]);
    store.set("big", large.clone(), None).await.unwrap();

    // 覆盖写入失败后持久层不再保留旧值
    assert!(durable.is_empty());
    assert_eq!(store.get("big").await.unwrap(), Some(large));

    store.l1().clear();
    assert_eq!(store.get("big").await.unwrap(), None);
}

#[tokio::test]
async fn test_quota_error_is_reported_by_durable_store() {
    let durable = MemoryDurableStore::with_quota(8);
    let err = durable
        .set("k", vec![0u8; 64])
        .await
        .expect_err("write over quota must fail");
    assert!(matches!(err, CacheError::QuotaExceeded { .. }));
}

/// 写入通知订阅者，删除不通知
#[tokio::test]
async fn test_set_notifies_and_delete_is_silent() {
    let (store, _) = memory_store("warm", Duration::from_secs(60));
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

    let sink = seen.clone();
    let _subscription = store.subscribe("issues", move |value| {
        sink.lock().unwrap().push(value.clone());
    });

    store.set("issues", json!([1]), None).await.unwrap();
    store.delete("issues").await.unwrap();
    store.set("other", json!([2]), None).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![json!([1])]);
    assert_eq!(store.get("issues").await.unwrap(), None);
}

/// 清空只影响本命名空间，订阅关系保留
#[tokio::test]
async fn test_clear_all_is_namespace_scoped() {
    let durable = MemoryDurableStore::new();
    let warm = DualTierStore::new(
        StoreOptions::new("warm", Duration::from_secs(60)),
        Arc::new(durable.clone()),
    );
    let session = DualTierStore::new(
        StoreOptions::new("session", Duration::from_secs(60)),
        Arc::new(durable.clone()),
    );

    warm.set("a", json!([1]), None).await.unwrap();
    session.set("a", json!([2]), None).await.unwrap();
    let _subscription = warm.subscribe("a", |_| {});

    warm.clear_all().await.unwrap();

    assert_eq!(warm.get("a").await.unwrap(), None);
    assert_eq!(session.get("a").await.unwrap(), Some(json!([2])));
    assert_eq!(warm.bus().subscriber_count("a"), 1);
}

#[tokio::test]
async fn test_purge_expired_and_list() {
    let (store, clock) = manual_store(
        "warm",
        Duration::from_secs(60),
        Arc::new(MemoryDurableStore::new()),
    );
    store.set("short", json!([1]), Some(Duration::from_secs(1))).await.unwrap();
    store.set("long", json!([2]), None).await.unwrap();

    clock.advance(Duration::from_secs(2));
    let entries = store.durable_entries().await.unwrap();
    assert_eq!(entries.len(), 2);

    assert_eq!(store.purge_expired().await.unwrap(), 1);
    let keys: Vec<String> = store
        .durable_entries()
        .await
        .unwrap()
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(keys, vec!["long".to_string()]);
}

#[tokio::test]
async fn test_empty_key_is_rejected() {
    let (store, _) = memory_store("warm", Duration::from_secs(60));
    assert!(matches!(
        store.set("", json!([1]), None).await,
        Err(CacheError::InvalidInput(_))
    ));
}

/// 降级与命中都记录到全局指标
#[tokio::test]
#[serial]
async fn test_metrics_record_degradation_and_hits() {
    GLOBAL_METRICS.reset();
    let namespace = generate_unique_namespace("metrics");
    let store = DualTierStore::new(
        StoreOptions::new(namespace.as_str(), Duration::from_secs(60)),
        Arc::new(MemoryDurableStore::with_quota(16)),
    );

    store.set("big", json!(["x".repeat(64)]), None).await.unwrap();
    let _ = store.get("big").await.unwrap();
    let _ = store.get("absent").await.unwrap();

    assert_eq!(GLOBAL_METRICS.durable_failure_count(&namespace, "set"), 1);
    assert_eq!(GLOBAL_METRICS.request_count(&namespace, "volatile", "get", "hit"), 1);
    assert_eq!(GLOBAL_METRICS.request_count(&namespace, "durable", "get", "miss"), 1);
    assert!(get_metrics_string().contains("cache_durable_failures_total"));
}
