//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 资源绑定（先返回缓存、后台重新验证）集成测试

#[path = "../common/mod.rs"]
mod common;

use async_trait::async_trait;
use common::{orchestrator, setup_logging, wait_until};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tiercache::backend::{DurableStore, MemoryDurableStore};
use tiercache::{
    CacheAside, CacheError, CachedResource, DualTierStore, FetchOptions, Params, StoreOptions,
};
use tokio::sync::oneshot;

/// 读取较慢的持久层，用于放大换绑时的填充窗口
#[derive(Clone, Default)]
struct SlowReadStore {
    inner: MemoryDurableStore,
}

#[async_trait]
impl DurableStore for SlowReadStore {
    async fn get(&self, key: &str) -> tiercache::Result<Option<Vec<u8>>> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> tiercache::Result<()> {
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> tiercache::Result<()> {
        self.inner.delete(key).await
    }

    async fn clear_prefix(&self, prefix: &str) -> tiercache::Result<usize> {
        self.inner.clear_prefix(prefix).await
    }

    async fn keys(&self, prefix: &str) -> tiercache::Result<Vec<String>> {
        self.inner.keys(prefix).await
    }

    fn name(&self) -> &'static str {
        "slow-memory"
    }
}

type Gates = Arc<Mutex<HashMap<String, oneshot::Receiver<Vec<u32>>>>>;

fn building(params: &Params) -> String {
    params
        .get("buildingId")
        .map(|v| v.to_string())
        .unwrap_or_default()
}

/// 旧参数的响应晚于新参数到达时被丢弃
#[tokio::test]
async fn test_superseded_response_is_discarded() {
    setup_logging();
    let cache = orchestrator("warm");
    let gates: Gates = Arc::new(Mutex::new(HashMap::new()));
    let (tx1, rx1) = oneshot::channel();
    let (tx2, rx2) = oneshot::channel();
    gates.lock().unwrap().insert("1".to_string(), rx1);
    gates.lock().unwrap().insert("2".to_string(), rx2);

    let producer_gates = gates.clone();
    let resource = CachedResource::<Vec<u32>>::mount(
        &cache,
        "alice",
        "buildings/issues",
        Params::new().with("buildingId", 1),
        move |params| {
            let rx = producer_gates.lock().unwrap().remove(&building(&params));
            async move {
                let rx = rx.ok_or_else(|| anyhow::anyhow!("unexpected request"))?;
                Ok::<_, anyhow::Error>(rx.await?)
            }
        },
        FetchOptions::new(),
    )
    .await;
    assert!(resource.snapshot().loading);

    resource
        .set_params(Params::new().with("buildingId", 2))
        .await;

    let mut watch = resource.watch();
    tx2.send(vec![20, 21]).unwrap();
    let state = watch
        .wait_for(|state| state.data.is_some())
        .await
        .unwrap()
        .clone();
    assert_eq!(state.data, Some(vec![20, 21]));

    tx1.send(vec![10]).unwrap();
    resource.settled().await;

    assert_eq!(resource.snapshot().data, Some(vec![20, 21]));
    assert_eq!(
        resource.key().as_str(),
        "alice::buildings/issues?buildingId=2"
    );
    // 旧请求仍然写入了它自己的键
    assert_eq!(
        cache
            .store()
            .get("alice::buildings/issues?buildingId=1")
            .await
            .unwrap(),
        Some(json!([10]))
    );
}

/// 旧键的响应在换绑后的填充期间到达时被丢弃
#[tokio::test]
async fn test_response_during_rebind_seed_is_discarded() {
    setup_logging();
    let store = DualTierStore::new(
        StoreOptions::new("warm", Duration::from_secs(300)),
        Arc::new(SlowReadStore::default()),
    );
    let cache = CacheAside::new(store);
    let gates: Gates = Arc::new(Mutex::new(HashMap::new()));
    let (tx1, rx1) = oneshot::channel();
    let (tx2, rx2) = oneshot::channel();
    gates.lock().unwrap().insert("1".to_string(), rx1);
    gates.lock().unwrap().insert("2".to_string(), rx2);
    let calls = Arc::new(AtomicUsize::new(0));

    let producer_gates = gates.clone();
    let producer_calls = calls.clone();
    let resource = CachedResource::<Vec<u32>>::mount(
        &cache,
        "u",
        "issues",
        Params::new().with("b", 1),
        move |params| {
            producer_calls.fetch_add(1, Ordering::SeqCst);
            let id = params.get("b").map(|v| v.to_string()).unwrap_or_default();
            let rx = producer_gates.lock().unwrap().remove(&id);
            async move {
                let rx = rx.ok_or_else(|| anyhow::anyhow!("unexpected request"))?;
                Ok::<_, anyhow::Error>(rx.await?)
            }
        },
        FetchOptions::new(),
    )
    .await;
    assert!(
        wait_until(|| calls.load(Ordering::SeqCst) == 1, Duration::from_secs(2)).await,
        "first producer never started"
    );

    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx1.send(vec![10]).unwrap();
    });
    resource.set_params(Params::new().with("b", 2)).await;
    release.await.unwrap();

    let state = resource.snapshot();
    assert_eq!(resource.key().as_str(), "u::issues?b=2");
    assert_eq!(state.data, None);
    assert!(state.loading);

    tx2.send(vec![20]).unwrap();
    resource.settled().await;
    assert_eq!(resource.snapshot().data, Some(vec![20]));
    assert!(!resource.snapshot().loading);
}

/// 同一键上的资源共享写入
#[tokio::test]
async fn test_write_fans_out_to_all_mounted_resources() {
    let cache = orchestrator("warm");
    let calls = Arc::new(AtomicUsize::new(0));

    let mount = |calls: Arc<AtomicUsize>| {
        CachedResource::<Vec<u32>>::mount(
            &cache,
            "",
            "buildings",
            Params::new(),
            move |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst) as u32;
                async move { Ok(vec![n]) }
            },
            FetchOptions::new(),
        )
    };

    let first = mount(calls.clone()).await;
    first.settled().await;
    let second = mount(calls.clone()).await;
    second.settled().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.snapshot().data, Some(vec![0]));

    first.refresh();
    first.settled().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(first.snapshot().data, Some(vec![1]));
    assert_eq!(second.snapshot().data, Some(vec![1]));
}

/// 卸载后到达的结果被丢弃，但仍写入缓存
#[tokio::test]
async fn test_unmounted_resource_ignores_late_result() {
    let cache = orchestrator("warm");
    let (tx, rx) = oneshot::channel::<Vec<u32>>();
    let rx = Arc::new(Mutex::new(Some(rx)));

    let resource = CachedResource::<Vec<u32>>::mount(
        &cache,
        "",
        "issues",
        Params::new(),
        move |_| {
            let rx = rx.lock().unwrap().take();
            async move {
                let rx = rx.ok_or_else(|| anyhow::anyhow!("called twice"))?;
                Ok::<_, anyhow::Error>(rx.await?)
            }
        },
        FetchOptions::new(),
    )
    .await;

    resource.unmount();
    assert!(!resource.is_mounted());
    assert_eq!(cache.store().bus().subscriber_count("issues"), 0);

    tx.send(vec![5]).unwrap();
    resource.settled().await;

    assert_eq!(resource.snapshot().data, None);
    assert_eq!(cache.store().get("issues").await.unwrap(), Some(json!([5])));
}

/// 重新验证失败时保留旧数据并记录错误
#[tokio::test]
async fn test_failed_refresh_keeps_previous_data() {
    let cache = orchestrator("warm");
    cache.store().set("summary", json!([1]), None).await.unwrap();
    let fail = Arc::new(std::sync::atomic::AtomicBool::new(true));

    let flag = fail.clone();
    let resource = CachedResource::<Vec<u32>>::mount(
        &cache,
        "",
        "summary",
        Params::new(),
        move |_| {
            let fail = flag.load(Ordering::SeqCst);
            async move {
                if fail {
                    Err(anyhow::anyhow!("timeout"))
                } else {
                    Ok(vec![2])
                }
            }
        },
        FetchOptions::new(),
    )
    .await;
    assert_eq!(resource.snapshot().data, Some(vec![1]));

    resource.refresh();
    resource.settled().await;
    let state = resource.snapshot();
    assert_eq!(state.data, Some(vec![1]));
    assert!(matches!(state.error, Some(CacheError::Producer(_))));

    fail.store(false, Ordering::SeqCst);
    resource.refresh();
    resource.settled().await;
    let state = resource.snapshot();
    assert_eq!(state.data, Some(vec![2]));
    assert!(state.error.is_none());
}

/// 丢弃资源句柄即取消订阅
#[tokio::test]
async fn test_drop_unsubscribes() {
    let cache = orchestrator("warm");
    let resource = CachedResource::<Vec<u32>>::mount(
        &cache,
        "u1",
        "buildings",
        Params::new(),
        |_| async { Ok(vec![1]) },
        FetchOptions::new(),
    )
    .await;
    resource.settled().await;
    assert_eq!(cache.store().bus().subscriber_count("u1::buildings"), 1);

    drop(resource);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(cache.store().bus().subscriber_count("u1::buildings"), 0);
}
