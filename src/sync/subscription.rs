//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了按键订阅的通知总线。
//!
//! 每次成功写入都会同步通知该键当前的所有订阅者，
//! 使同一份逻辑数据的多个使用方无需重新请求即可保持一致。

use dashmap::DashMap;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, instrument, warn};

/// 订阅回调
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

type Listeners = Vec<(u64, Callback)>;

struct BusInner {
    listeners: DashMap<String, Listeners>,
    next_id: AtomicU64,
}

/// 订阅总线
///
/// 克隆后共享同一组订阅。
#[derive(Clone)]
pub struct SubscriptionBus {
    inner: Arc<BusInner>,
}

impl Default for SubscriptionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// 订阅某个键
    ///
    /// 返回的 `Subscription` 被丢弃或调用 `unsubscribe` 时取消订阅。
    #[instrument(skip(self, callback), level = "debug")]
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .entry(key.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        debug!("subscribe: key={}, id={}", key, id);

        Subscription {
            bus: Arc::downgrade(&self.inner),
            key: key.to_string(),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// 通知某个键的所有订阅者，返回成功投递的数量
    ///
    /// 按订阅顺序同步调用；单个回调 panic 不影响其余回调。
    /// 调用回调前会释放内部锁，回调中可以安全地订阅或取消订阅。
    #[instrument(skip(self, value), level = "debug")]
    pub fn notify(&self, key: &str, value: &Value) -> usize {
        let snapshot: Listeners = match self.inner.listeners.get(key) {
            Some(listeners) => listeners.value().clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!("subscriber callback panicked: key={}, id={}", key, id),
            }
        }
        delivered
    }

    /// 某个键当前的订阅者数量
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .listeners
            .get(key)
            .map(|l| l.value().len())
            .unwrap_or(0)
    }

    /// 存在订阅者的键数量
    pub fn key_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// 移除全部订阅
    pub fn clear(&self) {
        self.inner.listeners.clear();
    }
}

impl BusInner {
    fn remove(&self, key: &str, id: u64) {
        if let Some(mut listeners) = self.listeners.get_mut(key) {
            listeners.retain(|(existing, _)| *existing != id);
        }
        // 集合为空时删除整个键，避免跨页面导航后泄漏
        self.listeners.remove_if(key, |_, listeners| listeners.is_empty());
    }
}

/// 订阅句柄
///
/// 取消订阅是幂等的；丢弃句柄等同于取消订阅。
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<BusInner>,
    key: String,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 取消订阅
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.key, self.id);
            debug!("unsubscribe: key={}, id={}", self.key, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
