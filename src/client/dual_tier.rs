//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了双层存储：易失层（Moka）加持久层（`DurableStore`），读命中持久层时提升到易失层。

use crate::backend::{DurableStore, L1Backend};
use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, Result};
use crate::metrics::GLOBAL_METRICS;
use crate::serialization::{CacheEntry, Serializer, SerializerEnum};
use crate::sync::subscription::{Subscription, SubscriptionBus};
use crate::utils::redaction::redact_cache_key;
use crate::utils::validate_key_length;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// 默认持久层键前缀
pub const DEFAULT_KEY_PREFIX: &str = "tiercache:";

/// 默认最大键长度
pub const DEFAULT_MAX_KEY_LENGTH: usize = 1024;

/// 存储构造选项
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// 命名空间，同时决定持久层键前缀与指标标签
    pub namespace: String,
    /// 持久层键的固定前缀
    pub key_prefix: String,
    /// 调用方未指定 TTL 时使用
    pub default_ttl: Duration,
    /// 易失层最大条目数
    pub max_capacity: u64,
    pub max_key_length: usize,
    pub serializer: SerializerEnum,
}

impl StoreOptions {
    pub fn new(namespace: impl Into<String>, default_ttl: Duration) -> Self {
        Self {
            namespace: namespace.into(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_ttl,
            max_capacity: 10_000,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            serializer: SerializerEnum::default(),
        }
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    pub fn with_max_key_length(mut self, max_key_length: usize) -> Self {
        self.max_key_length = max_key_length;
        self
    }

    pub fn with_serializer(mut self, serializer: SerializerEnum) -> Self {
        self.serializer = serializer;
        self
    }
}

struct StoreInner {
    options: StoreOptions,
    l1: L1Backend,
    durable: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    bus: SubscriptionBus,
    /// 串行化 `lock` 的检查与写入
    gate: Mutex<()>,
}

/// 双层存储
///
/// 克隆开销很小，所有克隆共享同一份数据、订阅总线和时钟。
///
/// 读取顺序：
/// 1. 易失层新鲜命中直接返回；过期条目立即删除
/// 2. 查询持久层，新鲜命中提升到易失层后返回
/// 3. 持久层过期或无法解码的记录从两层同时删除，视为未命中
///
/// 持久层的任何错误都只记录日志和指标，存储降级为仅内存模式。
#[derive(Clone)]
pub struct DualTierStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for DualTierStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualTierStore")
            .field("namespace", &self.inner.options.namespace)
            .field("durable", &self.inner.durable.name())
            .finish()
    }
}

impl DualTierStore {
    /// 使用系统时钟创建存储
    pub fn new(options: StoreOptions, durable: Arc<dyn DurableStore>) -> Self {
        Self::with_clock(options, durable, Arc::new(SystemClock))
    }

    /// 使用指定时钟创建存储
    pub fn with_clock(
        options: StoreOptions,
        durable: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        debug!(
            "creating dual-tier store: namespace={}, durable={}, default_ttl={:?}",
            options.namespace,
            durable.name(),
            options.default_ttl
        );
        let l1 = L1Backend::new(options.max_capacity);
        Self {
            inner: Arc::new(StoreInner {
                options,
                l1,
                durable,
                clock,
                bus: SubscriptionBus::new(),
                gate: Mutex::new(()),
            }),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.options.namespace
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.options.default_ttl
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn bus(&self) -> &SubscriptionBus {
        &self.inner.bus
    }

    pub fn l1(&self) -> &L1Backend {
        &self.inner.l1
    }

    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.inner.durable
    }

    /// 本命名空间在持久层中的键前缀
    pub fn durable_prefix(&self) -> String {
        format!(
            "{}{}:",
            self.inner.options.key_prefix, self.inner.options.namespace
        )
    }

    /// 逻辑键对应的持久层键
    pub fn durable_key(&self, key: &str) -> String {
        format!("{}{}", self.durable_prefix(), key)
    }

    fn check_key(&self, key: &str) -> Result<()> {
        validate_key_length(key, self.inner.options.max_key_length)
    }

    fn degrade(&self, op: &str, key: &str, err: &CacheError) {
        warn!(
            "durable {} failed, continuing volatile-only: namespace={}, key={}, error={}",
            op,
            self.namespace(),
            redact_cache_key(key),
            err
        );
        GLOBAL_METRICS.record_durable_failure(self.namespace(), op);
    }

    /// 读取值，未命中或已过期返回 `None`
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get_entry(key).await?.map(|entry| entry.value))
    }

    /// 读取完整条目（含过期时间）
    #[instrument(skip(self), level = "debug", fields(namespace = %self.namespace()))]
    pub async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.check_key(key)?;
        let start = Instant::now();
        let namespace = self.namespace();
        let now = self.inner.clock.now();

        if let Some(entry) = self.inner.l1.get_entry(key).await {
            if entry.is_fresh(now) {
                GLOBAL_METRICS.record_request(namespace, "volatile", "get", "hit");
                GLOBAL_METRICS.record_duration(
                    namespace,
                    "volatile",
                    "get",
                    start.elapsed().as_secs_f64(),
                );
                return Ok(Some(entry));
            }
            debug!("volatile entry expired: key={}", redact_cache_key(key));
            GLOBAL_METRICS.record_request(namespace, "volatile", "get", "stale");
            self.inner.l1.remove(key).await;
        } else {
            GLOBAL_METRICS.record_request(namespace, "volatile", "get", "miss");
        }

        let durable_key = self.durable_key(key);
        let bytes = match self.inner.durable.get(&durable_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                GLOBAL_METRICS.record_request(namespace, "durable", "get", "miss");
                return Ok(None);
            }
            Err(e) => {
                self.degrade("get", key, &e);
                return Ok(None);
            }
        };

        let entry = match self.inner.options.serializer.decode_entry(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    "dropping undecodable durable record: key={}, error={}",
                    redact_cache_key(key),
                    e
                );
                GLOBAL_METRICS.record_request(namespace, "durable", "get", "corrupt");
                self.evict(key).await;
                return Ok(None);
            }
        };

        if !entry.is_fresh(now) {
            debug!("durable entry expired: key={}", redact_cache_key(key));
            GLOBAL_METRICS.record_request(namespace, "durable", "get", "stale");
            self.evict(key).await;
            return Ok(None);
        }

        GLOBAL_METRICS.record_request(namespace, "durable", "get", "hit");
        self.inner.l1.insert(key, entry.clone()).await;
        debug!("promoted durable entry: key={}", redact_cache_key(key));
        GLOBAL_METRICS.record_duration(namespace, "durable", "get", start.elapsed().as_secs_f64());
        Ok(Some(entry))
    }

    /// 写入两层并通知订阅者
    ///
    /// `ttl` 为 `None` 时使用默认 TTL。持久层写入失败（如配额不足）不会返回错误。
    #[instrument(skip(self, value), level = "debug", fields(namespace = %self.namespace()))]
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        self.check_key(key)?;
        let ttl = ttl.unwrap_or(self.inner.options.default_ttl);
        let entry = CacheEntry::new(value, self.inner.clock.now(), ttl);
        self.write_entry(key, entry).await
    }

    async fn write_entry(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let start = Instant::now();
        let namespace = self.namespace();

        let bytes = self.inner.options.serializer.encode_entry(&entry)?;
        self.inner.l1.insert(key, entry.clone()).await;

        let durable_key = self.durable_key(key);
        match self.inner.durable.set(&durable_key, bytes).await {
            Ok(()) => GLOBAL_METRICS.record_request(namespace, "durable", "set", "ok"),
            Err(e) => {
                self.degrade("set", key, &e);
                // 持久层不能保留被覆盖的旧值
                if let Err(e) = self.inner.durable.delete(&durable_key).await {
                    self.degrade("delete", key, &e);
                }
            }
        }
        GLOBAL_METRICS.record_duration(namespace, "both", "set", start.elapsed().as_secs_f64());

        let delivered = self.inner.bus.notify(key, &entry.value);
        debug!(
            "stored entry: key={}, expires_at={}, notified={}",
            redact_cache_key(key),
            entry.expires_at,
            delivered
        );
        Ok(())
    }

    /// 从两层删除，不通知订阅者
    #[instrument(skip(self), level = "debug", fields(namespace = %self.namespace()))]
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.check_key(key)?;
        self.evict(key).await;
        Ok(())
    }

    async fn evict(&self, key: &str) {
        self.inner.l1.remove(key).await;
        if let Err(e) = self.inner.durable.delete(&self.durable_key(key)).await {
            self.degrade("delete", key, &e);
        }
    }

    /// 清空本命名空间的两层数据，订阅关系保留
    #[instrument(skip(self), level = "info", fields(namespace = %self.namespace()))]
    pub async fn clear_all(&self) -> Result<()> {
        self.inner.l1.clear();
        match self.inner.durable.clear_prefix(&self.durable_prefix()).await {
            Ok(removed) => debug!("cleared {} durable records", removed),
            Err(e) => self.degrade("clear", "*", &e),
        }
        Ok(())
    }

    /// 原子地检查并写入一个短期标记
    ///
    /// 键上已有新鲜条目时返回 `false`，否则写入标记并返回 `true`。
    /// 同一存储上的并发调用只有一个能成功。
    #[instrument(skip(self), level = "debug", fields(namespace = %self.namespace()))]
    pub async fn lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check_key(key)?;
        let _gate = self.inner.gate.lock().await;
        if self.get_entry(key).await?.is_some() {
            debug!("lock held: key={}", redact_cache_key(key));
            return Ok(false);
        }
        let now = self.inner.clock.now();
        let marker = serde_json::json!({ "lockedAt": now.timestamp_millis() });
        self.write_entry(key, CacheEntry::new(marker, now, ttl))
            .await?;
        Ok(true)
    }

    /// 释放标记
    pub async fn unlock(&self, key: &str) -> Result<()> {
        let _gate = self.inner.gate.lock().await;
        self.delete(key).await
    }

    /// 订阅键的写入
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(key, callback)
    }

    /// 列出本命名空间持久层中可解码的记录（逻辑键，条目），含已过期条目
    #[instrument(skip(self), level = "debug", fields(namespace = %self.namespace()))]
    pub async fn durable_entries(&self) -> Result<Vec<(String, CacheEntry)>> {
        let prefix = self.durable_prefix();
        let mut entries = Vec::new();
        for durable_key in self.inner.durable.keys(&prefix).await? {
            let Some(bytes) = self.inner.durable.get(&durable_key).await? else {
                continue;
            };
            let key = durable_key[prefix.len()..].to_string();
            match self.inner.options.serializer.decode_entry(&bytes) {
                Ok(entry) => entries.push((key, entry)),
                Err(e) => warn!("skipping undecodable record: key={}, error={}", key, e),
            }
        }
        Ok(entries)
    }

    /// 删除持久层中已过期或无法解码的记录，返回删除数量
    #[instrument(skip(self), level = "info", fields(namespace = %self.namespace()))]
    pub async fn purge_expired(&self) -> Result<usize> {
        let prefix = self.durable_prefix();
        let now = self.inner.clock.now();
        let mut removed = 0;
        for durable_key in self.inner.durable.keys(&prefix).await? {
            let expired = match self.inner.durable.get(&durable_key).await? {
                Some(bytes) => self
                    .inner
                    .options
                    .serializer
                    .decode_entry(&bytes)
                    .map(|entry| !entry.is_fresh(now))
                    .unwrap_or(true),
                None => false,
            };
            if expired {
                self.inner.durable.delete(&durable_key).await?;
                self.inner.l1.remove(&durable_key[prefix.len()..]).await;
                removed += 1;
            }
        }
        debug!("purged {} expired records", removed);
        Ok(removed)
    }
}
