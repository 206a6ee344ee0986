//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 先返回缓存、后台重新验证（stale-while-revalidate）的资源绑定。
//!
//! 挂载时先订阅键，再用缓存中的值填充状态，最后通过编排器重新验证。
//! 每次重新验证领取一个递增的票据，只有仍处于挂载状态且票据为最新的结果才会写入状态。

use super::cache_aside::{CacheAside, FetchOptions};
use super::CacheExt;
use crate::error::CacheError;
use crate::key::{CacheKey, Params};
use crate::sync::subscription::Subscription;
use crate::utils::redaction::redact_cache_key;
use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// 资源状态
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState<T> {
    /// 最近一次得到的数据
    pub data: Option<T>,
    /// 尚无任何数据且请求进行中
    pub loading: bool,
    /// 最近一次重新验证的错误，成功后清除
    pub error: Option<CacheError>,
}

impl<T> Default for ResourceState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

type ProducerFn<T> = Arc<dyn Fn(Params) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

struct Binding {
    key: CacheKey,
    params: Params,
    subscription: Option<Subscription>,
}

struct ResourceInner<T> {
    cache: CacheAside,
    identity: String,
    name: String,
    options: FetchOptions,
    producer: ProducerFn<T>,
    state: watch::Sender<ResourceState<T>>,
    ticket: AtomicU64,
    mounted: AtomicBool,
    binding: Mutex<Binding>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 绑定到一个缓存键的资源
///
/// 丢弃句柄等同于卸载：取消订阅，之后到达的结果全部丢弃。
pub struct CachedResource<T> {
    inner: Arc<ResourceInner<T>>,
}

impl<T> CachedResource<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// 挂载资源
    ///
    /// `identity` 为空时使用不带身份前缀的键。
    pub async fn mount<F, Fut>(
        cache: &CacheAside,
        identity: &str,
        name: &str,
        params: Params,
        producer: F,
        options: FetchOptions,
    ) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let key = key_for(cache, identity, name, &params);
        let (state, _) = watch::channel(ResourceState {
            data: None,
            loading: true,
            error: None,
        });
        let producer: ProducerFn<T> = Arc::new(move |params| producer(params).boxed());

        let resource = Self {
            inner: Arc::new(ResourceInner {
                cache: cache.clone(),
                identity: identity.to_string(),
                name: name.to_string(),
                options,
                producer,
                state,
                ticket: AtomicU64::new(0),
                mounted: AtomicBool::new(true),
                binding: Mutex::new(Binding {
                    key: key.clone(),
                    params,
                    subscription: None,
                }),
                pending: Mutex::new(Vec::new()),
            }),
        };
        debug!(
            "mounting resource: name={}, key={}",
            resource.inner.name,
            redact_cache_key(key.as_str())
        );

        let subscription = resource.subscribe(&key);
        locked(&resource.inner.binding).subscription = Some(subscription);
        resource.seed(&key).await;
        resource.revalidate(false);
        resource
    }

    /// 当前状态快照
    pub fn snapshot(&self) -> ResourceState<T> {
        self.inner.state.borrow().clone()
    }

    /// 订阅状态变化
    pub fn watch(&self) -> watch::Receiver<ResourceState<T>> {
        self.inner.state.subscribe()
    }

    /// 当前绑定的键
    pub fn key(&self) -> CacheKey {
        locked(&self.inner.binding).key.clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::SeqCst)
    }

    /// 跳过缓存强制重新请求
    pub fn refresh(&self) {
        if self.is_mounted() {
            self.revalidate(true);
        }
    }

    /// 切换参数：重新绑定到新键，重新填充并重新验证
    pub async fn set_params(&self, params: Params) {
        if !self.is_mounted() {
            return;
        }
        let key = key_for(&self.inner.cache, &self.inner.identity, &self.inner.name, &params);
        let subscription = self.subscribe(&key);
        let previous = {
            let mut binding = locked(&self.inner.binding);
            binding.key = key.clone();
            binding.params = params;
            // 换绑与作废旧票据在同一临界区内完成
            self.inner.ticket.fetch_add(1, Ordering::SeqCst);
            binding.subscription.replace(subscription)
        };
        drop(previous);

        debug!("rebinding resource: key={}", redact_cache_key(key.as_str()));
        self.inner.state.send_modify(|state| {
            state.data = None;
            state.error = None;
            state.loading = true;
        });
        self.seed(&key).await;
        self.revalidate(false);
    }

    /// 卸载：取消订阅，之后到达的结果全部丢弃
    pub fn unmount(&self) {
        if self.inner.mounted.swap(false, Ordering::SeqCst) {
            let subscription = locked(&self.inner.binding).subscription.take();
            drop(subscription);
            debug!("resource unmounted: name={}", self.inner.name);
        }
    }

    /// 等待所有已发起的重新验证结束
    pub async fn settled(&self) {
        let handles: Vec<JoinHandle<()>> = locked(&self.inner.pending).drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn subscribe(&self, key: &CacheKey) -> Subscription {
        let weak: Weak<ResourceInner<T>> = Arc::downgrade(&self.inner);
        self.inner
            .cache
            .store()
            .subscribe(key.as_str(), move |value: &Value| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !inner.mounted.load(Ordering::SeqCst) {
                    return;
                }
                match serde_json::from_value::<T>(value.clone()) {
                    Ok(data) => inner.state.send_modify(|state| {
                        state.data = Some(data);
                        state.loading = false;
                        state.error = None;
                    }),
                    Err(e) => debug!("ignoring update with unexpected shape: {}", e),
                }
            })
    }

    async fn seed(&self, key: &CacheKey) {
        let cached = match self.inner.cache.store().get_typed::<T>(key.as_str()).await {
            Ok(cached) => cached,
            Err(e) => {
                debug!("seed read failed: key={}, error={}", redact_cache_key(key.as_str()), e);
                None
            }
        };
        if let Some(data) = cached {
            if locked(&self.inner.binding).key != *key {
                return;
            }
            self.inner.state.send_modify(|state| {
                state.data = Some(data);
                state.loading = false;
            });
        }
    }

    fn revalidate(&self, force: bool) {
        let inner = &self.inner;
        let (ticket, key, params) = {
            let binding = locked(&inner.binding);
            let ticket = inner.ticket.fetch_add(1, Ordering::SeqCst) + 1;
            (ticket, binding.key.clone(), binding.params.clone())
        };
        let cache = inner.cache.clone();
        let producer = inner.producer.clone();
        let mut options = inner.options.clone();
        options.force_refresh |= force;
        let weak = Arc::downgrade(inner);

        let handle = tokio::spawn(async move {
            let result = cache
                .fetch::<T, _, _>(&key, move || producer(params), &options)
                .await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.mounted.load(Ordering::SeqCst) {
                debug!("discarding result after unmount: ticket={}", ticket);
                return;
            }
            let current = locked(&inner.binding).key == key;
            if !current || inner.ticket.load(Ordering::SeqCst) != ticket {
                debug!(
                    "discarding superseded result: key={}, ticket={}",
                    redact_cache_key(key.as_str()),
                    ticket
                );
                return;
            }
            inner.state.send_modify(|state| {
                match result {
                    Ok(data) => {
                        state.data = Some(data);
                        state.error = None;
                    }
                    Err(e) => state.error = Some(e),
                }
                state.loading = false;
            });
        });

        let mut pending = locked(&inner.pending);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}

impl<T> Drop for CachedResource<T> {
    fn drop(&mut self) {
        self.inner.mounted.store(false, Ordering::SeqCst);
        let subscription = locked(&self.inner.binding).subscription.take();
        drop(subscription);
    }
}

fn key_for(cache: &CacheAside, identity: &str, name: &str, params: &Params) -> CacheKey {
    if identity.is_empty() {
        cache.key(name, params)
    } else {
        cache.scoped_key(identity, name, params)
    }
}
