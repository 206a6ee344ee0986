//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 会话预热与空闲预取集成测试

#[path = "../common/mod.rs"]
mod common;

use common::{orchestrator, setup_logging};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiercache::config::{PrefetchConfig, WarmupConfig};
use tiercache::sync::{speculative_window, IdlePrefetcher};
use tiercache::{Params, SessionContext, WarmupManager, WarmupStatus, WarmupTask};

fn counting_plan(
    calls: Arc<AtomicUsize>,
) -> impl Fn(&SessionContext) -> Vec<WarmupTask> + Send + Sync {
    move |session: &SessionContext| {
        let calls = calls.clone();
        vec![
            WarmupTask::new("buildings", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(vec!["b1", "b2"])
            }),
            WarmupTask::new("dashboard", || async { Ok(json!({"ok": true})) })
                .with_params(Params::new().with("scopes", session.scopes.join(","))),
        ]
    }
}

/// 并发触发两次预热，生产者只被调用一次
#[tokio::test]
async fn test_concurrent_warm_up_runs_once() {
    setup_logging();
    let cache = orchestrator("warm");
    let manager = WarmupManager::new(cache.clone(), WarmupConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let plan = counting_plan(calls.clone());
    let session = SessionContext::new("alice", "staff").with_scopes(["b1"]);

    let (first, second) = tokio::join!(
        manager.warm_up(&session, &plan),
        manager.warm_up(&session, &plan)
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(first.guarded != second.guarded);
    let ran = if first.guarded { second } else { first };
    assert_eq!(ran.loaded, 2);
    assert!(ran.success);

    assert_eq!(
        cache.store().get("alice::buildings").await.unwrap(),
        Some(json!(["b1", "b2"]))
    );
    assert_eq!(
        manager.status("alice").await,
        WarmupStatus::Completed { loaded: 2, failed: 0 }
    );
}

/// 标记有效期内再次预热直接跳过，过期后可以再次执行
#[tokio::test]
async fn test_guard_expires() {
    let cache = orchestrator("warm");
    let config = WarmupConfig {
        guard_ttl_ms: 50,
        ..WarmupConfig::default()
    };
    let manager = WarmupManager::new(cache.clone(), config);
    let calls = Arc::new(AtomicUsize::new(0));
    let plan = counting_plan(calls.clone());
    let session = SessionContext::new("bob", "staff");

    assert!(!manager.warm_up(&session, &plan).await.guarded);
    assert!(manager.warm_up(&session, &plan).await.guarded);

    tokio::time::sleep(Duration::from_millis(60)).await;
    // 数据仍在缓存中，生产者不会再被调用
    let again = manager.warm_up(&session, &plan).await;
    assert!(!again.guarded);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// 不同身份各自预热
#[tokio::test]
async fn test_guard_is_per_identity() {
    let cache = orchestrator("warm");
    let manager = WarmupManager::new(cache, WarmupConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let plan = counting_plan(calls.clone());

    let a = manager.warm_up(&SessionContext::new("a", "staff"), &plan).await;
    let b = manager.warm_up(&SessionContext::new("b", "staff"), &plan).await;
    assert!(!a.guarded && !b.guarded);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_spawned_warm_up() {
    let cache = orchestrator("warm");
    let manager = WarmupManager::new(cache, WarmupConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let plan = Arc::new(counting_plan(calls.clone()));

    let result = manager
        .spawn_warm_up(SessionContext::new("carol", "staff"), plan)
        .await
        .unwrap();
    assert_eq!(result.loaded, 2);
}

/// 取消后尚未开始的预取任务不再执行
#[tokio::test]
async fn test_prefetch_cancelled_before_idle() {
    setup_logging();
    let cache = orchestrator("warm");
    let prefetcher = IdlePrefetcher::new(
        cache.clone(),
        PrefetchConfig {
            idle_delay_ms: 200,
            ..PrefetchConfig::default()
        },
    );
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks = (0..3)
        .map(|i| {
            let calls = calls.clone();
            WarmupTask::new(format!("building/{}", i), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![i])
            })
        })
        .collect();

    let handle = prefetcher.schedule(&SessionContext::new("dave", "staff"), tasks);
    handle.cancel();
    let report = handle.join().await;

    assert!(report.cancelled);
    assert_eq!(report.loaded, 0);
    assert_eq!(report.skipped, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// 丢弃句柄等同于取消
#[tokio::test]
async fn test_prefetch_dropped_handle_cancels() {
    let cache = orchestrator("warm");
    let prefetcher = IdlePrefetcher::new(
        cache.clone(),
        PrefetchConfig {
            idle_delay_ms: 50,
            ..PrefetchConfig::default()
        },
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let task = WarmupTask::new("building/9", move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(vec![9])
    });

    drop(prefetcher.schedule(&SessionContext::new("erin", "staff"), vec![task]));
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(cache.store().get("erin::building/9").await.unwrap(), None);
}

/// 空闲后按角色过滤执行预取
#[tokio::test]
async fn test_prefetch_runs_after_idle_delay() {
    let cache = orchestrator("warm");
    let prefetcher = IdlePrefetcher::new(
        cache.clone(),
        PrefetchConfig {
            idle_delay_ms: 10,
            ..PrefetchConfig::default()
        },
    );
    let buildings = vec!["b1", "b2", "b3", "b4"];
    let tasks = speculative_window(&buildings, &"b1", 2)
        .into_iter()
        .map(|id| {
            WarmupTask::new("buildings/issues", move || async move { Ok(vec![id]) })
                .with_params(Params::new().with("buildingId", id))
        })
        .chain(std::iter::once(
            WarmupTask::new("finance", || async { Ok(vec![1]) }).for_roles(["manager"]),
        ))
        .collect();

    let report = prefetcher
        .schedule(&SessionContext::new("frank", "staff"), tasks)
        .join()
        .await;

    assert_eq!(report.loaded, 2);
    assert_eq!(report.skipped, 1);
    assert!(!report.cancelled);
    assert_eq!(
        cache
            .store()
            .get("frank::buildings/issues?buildingId=b3")
            .await
            .unwrap(),
        Some(json!(["b3"]))
    );
}

/// 整体超时后返回失败，状态记录超时错误
#[tokio::test]
async fn test_warm_up_timeout() {
    let cache = orchestrator("warm");
    let config = WarmupConfig {
        timeout_seconds: 1,
        ..WarmupConfig::default()
    };
    let manager = WarmupManager::new(cache, config);
    let plan = |_: &SessionContext| {
        vec![WarmupTask::new("slow", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![1])
        })]
    };

    let result = manager.warm_up(&SessionContext::new("gina", "staff"), &plan).await;
    assert!(!result.success);
    assert!(result.error.as_deref().is_some_and(|e| e.contains("Timeout")));
    assert!(matches!(
        manager.status("gina").await,
        WarmupStatus::Failed { .. }
    ));
}
