//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 旁路缓存编排器集成测试

#[path = "../common/mod.rs"]
mod common;

use common::{orchestrator, setup_logging, wait_until};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiercache::client::validator;
use tiercache::{CacheError, FetchOptions, Params};
use tokio::sync::oneshot;

/// 连续两次调用只触发一次生产者
#[tokio::test]
async fn test_second_call_is_served_from_cache() {
    setup_logging();
    let cache = orchestrator("warm");
    let calls = Arc::new(AtomicUsize::new(0));
    let params = Params::new().with("buildingId", 7);

    for _ in 0..3 {
        let calls = calls.clone();
        let issues: Vec<String> = cache
            .with_cache(
                "buildings/issues",
                &params,
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec!["leak".to_string(), "lift".to_string()])
                },
                &FetchOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(issues, vec!["leak", "lift"]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// 并发未命中共享同一次生产者调用
#[tokio::test]
async fn test_concurrent_misses_share_one_producer_call() {
    setup_logging();
    let cache = orchestrator("warm");
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel::<Vec<u32>>();
    let rx = Arc::new(tokio::sync::Mutex::new(Some(rx)));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let cache = cache.clone();
        let calls = calls.clone();
        let rx = rx.clone();
        handles.push(tokio::spawn(async move {
            cache
                .with_cache(
                    "buildings",
                    &Params::new(),
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let rx = rx.lock().await.take().expect("producer called twice");
                        Ok::<_, anyhow::Error>(rx.await?)
                    },
                    &FetchOptions::new(),
                )
                .await
        }));
    }

    assert!(wait_until(|| cache.in_flight() == 1, Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(vec![1, 2, 3]).unwrap();

    for handle in handles {
        let value: Vec<u32> = handle.await.unwrap().unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.in_flight(), 0);
}

/// 关闭合并后每个调用方各自调用生产者
#[tokio::test]
async fn test_dedupe_disabled_calls_producer_per_caller() {
    let cache = orchestrator("warm").with_dedupe(false);
    let calls = Arc::new(AtomicUsize::new(0));

    let run = |calls: Arc<AtomicUsize>| {
        let cache = cache.clone();
        async move {
            cache
                .with_cache::<Vec<u32>, _, _>(
                    "slow",
                    &Params::new(),
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(vec![1])
                    },
                    &FetchOptions::new(),
                )
                .await
        }
    };

    let (a, b) = tokio::join!(run(calls.clone()), run(calls.clone()));
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// 校验器拒绝的结果不写入缓存，下一次调用重新请求
#[tokio::test]
async fn test_validator_gates_caching() {
    let cache = orchestrator("warm");
    let calls = Arc::new(AtomicUsize::new(0));
    let options = FetchOptions::new()
        .with_validator(validator::from_fn(|v| v.get("items").is_some()));

    for _ in 0..2 {
        let calls = calls.clone();
        let value: Value = cache
            .with_cache(
                "summary",
                &Params::new(),
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"message": "unauthorized"}))
                },
                &options,
            )
            .await
            .unwrap();
        assert_eq!(value, json!({"message": "unauthorized"}));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.store().get("summary").await.unwrap(), None);
}

/// 默认校验器按旧的形状规则判断
#[tokio::test]
async fn test_default_shape_guard() {
    let cache = orchestrator("warm");

    let _: Value = cache
        .with_cache(
            "ok",
            &Params::new(),
            || async { Ok(json!({"ok": true, "data": [1]})) },
            &FetchOptions::new(),
        )
        .await
        .unwrap();
    let _: Value = cache
        .with_cache(
            "scalar",
            &Params::new(),
            || async { Ok(json!(42)) },
            &FetchOptions::new(),
        )
        .await
        .unwrap();

    assert!(cache.store().get("ok").await.unwrap().is_some());
    assert!(cache.store().get("scalar").await.unwrap().is_none());
}

#[tokio::test]
async fn test_force_refresh_bypasses_cache() {
    let cache = orchestrator("warm");
    cache.store().set("buildings", json!([1]), None).await.unwrap();

    let value: Vec<u32> = cache
        .with_cache(
            "buildings",
            &Params::new(),
            || async { Ok(vec![2]) },
            &FetchOptions::new().force_refresh(),
        )
        .await
        .unwrap();
    assert_eq!(value, vec![2]);
    assert_eq!(cache.store().get("buildings").await.unwrap(), Some(json!([2])));
}

/// 生产者失败时错误原样返回，缓存保持不变
#[tokio::test]
async fn test_producer_failure_leaves_cache_untouched() {
    let cache = orchestrator("warm");
    let err = cache
        .with_cache::<Vec<u32>, _, _>(
            "buildings",
            &Params::new(),
            || async { Err(anyhow::anyhow!("network down")) },
            &FetchOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::Producer(_)));
    assert_eq!(cache.store().get("buildings").await.unwrap(), None);
    assert_eq!(cache.in_flight(), 0);
}

/// 调用方放弃等待后生产者仍会完成并写入缓存
#[tokio::test]
async fn test_abandoned_call_still_populates_cache() {
    let cache = orchestrator("warm");

    let params = Params::new();
    let opts = FetchOptions::new();
    let pending = cache.with_cache::<Vec<u32>, _, _>(
        "buildings",
        &params,
        || async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(vec![9])
        },
        &opts,
    );
    let timed_out = tokio::time::timeout(Duration::from_millis(5), pending).await;
    assert!(timed_out.is_err());

    let store = cache.store().clone();
    let mut populated = false;
    for _ in 0..100 {
        if store.get("buildings").await.unwrap().is_some() {
            populated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(populated);
}

/// 带身份前缀的键互不干扰
#[tokio::test]
async fn test_scoped_keys_are_isolated() {
    let cache = orchestrator("session");

    let alice: Vec<String> = cache
        .with_cache_scoped(
            "alice",
            "profile",
            &Params::new(),
            || async { Ok(vec!["alice".to_string()]) },
            &FetchOptions::new(),
        )
        .await
        .unwrap();
    let bob: Vec<String> = cache
        .with_cache_scoped(
            "bob",
            "profile",
            &Params::new(),
            || async { Ok(vec!["bob".to_string()]) },
            &FetchOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(alice, vec!["alice"]);
    assert_eq!(bob, vec!["bob"]);
}
