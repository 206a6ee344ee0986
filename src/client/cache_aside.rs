//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 旁路缓存编排：命中直接返回，未命中调用生产者，校验通过的结果写回两层并通知订阅者。

use super::dual_tier::DualTierStore;
use super::validator::{shape_guard, Validator};
use super::CacheExt;
use crate::error::{CacheError, Result};
use crate::key::{CacheKey, KeyBuilder, Params};
use crate::metrics::GLOBAL_METRICS;
use crate::sync::single_flight::FlightGroup;
use crate::utils::redaction::redact_cache_key;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// 单次调用的选项
#[derive(Clone, Default)]
pub struct FetchOptions {
    /// 覆盖默认 TTL
    pub ttl: Option<Duration>,
    /// 覆盖编排器的默认校验器
    pub validator: Option<Validator>,
    /// 跳过缓存读取，总是调用生产者
    pub force_refresh: bool,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("ttl", &self.ttl)
            .field("validator", &self.validator.as_ref().map(|_| "custom"))
            .field("force_refresh", &self.force_refresh)
            .finish()
    }
}

/// 旁路缓存编排器
///
/// 同一键的并发未命中只调用一次生产者（可通过 `with_dedupe(false)` 关闭），
/// 后加入的调用方共享首个调用方的选项（TTL 与校验器）。
/// 生产者在独立任务中运行，即使所有调用方都已放弃等待也会执行完毕并写入缓存。
#[derive(Clone)]
pub struct CacheAside {
    store: DualTierStore,
    keys: Arc<KeyBuilder>,
    flights: FlightGroup,
    validator: Validator,
    dedupe: bool,
}

impl fmt::Debug for CacheAside {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheAside")
            .field("store", &self.store)
            .field("dedupe", &self.dedupe)
            .field("in_flight", &self.flights.len())
            .finish()
    }
}

impl CacheAside {
    pub fn new(store: DualTierStore) -> Self {
        Self {
            store,
            keys: Arc::new(KeyBuilder::default()),
            flights: FlightGroup::new(),
            validator: shape_guard(),
            dedupe: true,
        }
    }

    pub fn with_key_builder(mut self, keys: Arc<KeyBuilder>) -> Self {
        self.keys = keys;
        self
    }

    /// 设置默认校验器
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    pub fn store(&self) -> &DualTierStore {
        &self.store
    }

    pub fn key_builder(&self) -> &KeyBuilder {
        &self.keys
    }

    /// 当前进行中的生产者调用数
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    pub fn key(&self, name: &str, params: &Params) -> CacheKey {
        self.keys.build(name, params)
    }

    pub fn scoped_key(&self, identity: &str, name: &str, params: &Params) -> CacheKey {
        self.keys.build_scoped(identity, name, params)
    }

    /// 按资源名和参数读取，未命中时调用生产者
    pub async fn with_cache<T, P, Fut>(
        &self,
        name: &str,
        params: &Params,
        producer: P,
        options: &FetchOptions,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        P: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let key = self.key(name, params);
        self.fetch(&key, producer, options).await
    }

    /// 同 `with_cache`，键带用户身份前缀
    pub async fn with_cache_scoped<T, P, Fut>(
        &self,
        identity: &str,
        name: &str,
        params: &Params,
        producer: P,
        options: &FetchOptions,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        P: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let key = self.scoped_key(identity, name, params);
        self.fetch(&key, producer, options).await
    }

    /// 按已构造的键读取
    ///
    /// 生产者失败返回 `CacheError::Producer`，不写入缓存。
    /// 校验器拒绝的结果照常返回，但不写入缓存。
    #[instrument(
        skip(self, key, producer, options),
        level = "debug",
        fields(key = %redact_cache_key(key.as_str()))
    )]
    pub async fn fetch<T, P, Fut>(
        &self,
        key: &CacheKey,
        producer: P,
        options: &FetchOptions,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        P: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let namespace = self.store.namespace().to_string();

        if !options.force_refresh {
            match self.store.get_typed::<T>(key.as_str()).await {
                Ok(Some(value)) => {
                    GLOBAL_METRICS.record_request(&namespace, "cache", "fetch", "hit");
                    return Ok(value);
                }
                Ok(None) => {}
                Err(CacheError::Serialization(e)) => {
                    warn!(
                        "cached value has unexpected shape, refetching: key={}, error={}",
                        redact_cache_key(key.as_str()),
                        e
                    );
                    self.store.delete(key.as_str()).await?;
                }
                Err(e) => return Err(e),
            }
        }
        GLOBAL_METRICS.record_request(&namespace, "cache", "fetch", "miss");

        let store = self.store.clone();
        let validator = options
            .validator
            .clone()
            .unwrap_or_else(|| self.validator.clone());
        let ttl = options.ttl;
        let owned_key = key.as_str().to_string();

        let work = move || {
            let produced = producer();
            async move {
                let produced = produced
                    .await
                    .map_err(|e| CacheError::Producer(format!("{:#}", e)))?;
                let value = serde_json::to_value(&produced)?;

                if validator(&value) {
                    store.set(&owned_key, value.clone(), ttl).await?;
                    GLOBAL_METRICS.record_request(&namespace, "producer", "fetch", "cached");
                } else {
                    debug!(
                        "validator rejected result, not caching: key={}",
                        redact_cache_key(&owned_key)
                    );
                    GLOBAL_METRICS.record_request(&namespace, "producer", "fetch", "rejected");
                }
                Ok(value)
            }
        };

        let flight = if self.dedupe {
            let (flight, leader) = self.flights.join_or_start(key.as_str(), work);
            if !leader {
                debug!("sharing in-flight producer: key={}", redact_cache_key(key.as_str()));
            }
            flight
        } else {
            self.flights.start_detached(work())
        };

        let value = flight.await?;
        Ok(serde_json::from_value(value)?)
    }
}
