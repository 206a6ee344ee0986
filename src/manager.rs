//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存管理器，负责按配置构造并持有所有缓存门面及其生命周期。

use crate::backend::{DurableStore, MemoryDurableStore, SqliteDurableStore};
use crate::client::{CacheAside, DualTierStore, InstantCache, SessionCache, StoreOptions, WarmCache};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, DurableBackend, NamespaceConfig};
use crate::error::{CacheError, Result};
use crate::key::KeyBuilder;
use crate::metrics::get_metrics_string;
use crate::serialization::{json::JsonSerializer, SerializerEnum};
use crate::sync::{IdlePrefetcher, WarmupManager};
use crate::utils::redaction::Redacted;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// 关闭时等待进行中请求完成的最长时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// 缓存管理器
///
/// 显式构造、显式传递，不存在进程级的全局缓存实例。
/// 三个门面共享同一个持久层，但命名空间互不重叠。
pub struct CacheManager {
    config: Config,
    durable: Arc<dyn DurableStore>,
    keys: Arc<KeyBuilder>,
    instant: InstantCache,
    warm: WarmCache,
    session: SessionCache,
    warmup: WarmupManager,
    prefetcher: IdlePrefetcher,
}

impl CacheManager {
    /// 初始化缓存管理器
    ///
    /// 根据配置打开持久层并构造所有门面
    ///
    /// # 参数
    ///
    /// * `config` - 缓存系统配置
    #[instrument(skip(config), level = "info", fields(backend = ?config.durable.backend))]
    pub async fn init(config: Config) -> Result<Self> {
        config.validate().map_err(CacheError::ConfigError)?;

        let durable: Arc<dyn DurableStore> = match config.durable.backend {
            DurableBackend::Sqlite if config.durable.path == ":memory:" => {
                Arc::new(SqliteDurableStore::in_memory().await?)
            }
            DurableBackend::Sqlite => {
                Arc::new(SqliteDurableStore::open(&config.durable.path).await?)
            }
            DurableBackend::Memory => match config.durable.quota_bytes {
                Some(quota) => Arc::new(MemoryDurableStore::with_quota(quota)),
                None => Arc::new(MemoryDurableStore::new()),
            },
        };
        info!("Initializing CacheManager with {} durable store", durable.name());
        Self::with_durable(config, durable)
    }

    /// 使用已构造的持久层
    pub fn with_durable(config: Config, durable: Arc<dyn DurableStore>) -> Result<Self> {
        Self::with_clock(config, durable, Arc::new(SystemClock))
    }

    /// 使用已构造的持久层和时钟
    pub fn with_clock(
        config: Config,
        durable: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().map_err(CacheError::ConfigError)?;

        let keys = Arc::new(KeyBuilder::with_secret_fields(&config.keys.secret_fields)?);
        let serializer = if config.global.compress {
            SerializerEnum::Json(JsonSerializer::with_compression())
        } else {
            SerializerEnum::Json(JsonSerializer::new())
        };

        let build = |namespace: &str, ns: &NamespaceConfig| -> CacheAside {
            let options = StoreOptions::new(namespace, ns.ttl())
                .with_key_prefix(config.global.key_prefix.clone())
                .with_max_capacity(ns.max_capacity)
                .with_max_key_length(config.global.max_key_length)
                .with_serializer(serializer.clone());
            let store = DualTierStore::with_clock(options, durable.clone(), clock.clone());
            CacheAside::new(store)
                .with_key_builder(keys.clone())
                .with_dedupe(config.cache.dedupe_in_flight)
        };

        let instant = InstantCache::from_aside(build(InstantCache::NAMESPACE, &config.instant));
        let warm = WarmCache::from_aside(build(WarmCache::NAMESPACE, &config.warm));
        let session = SessionCache::from_aside(build(SessionCache::NAMESPACE, &config.session));

        let warmup = WarmupManager::new((*warm).clone(), config.warmup.clone());
        let prefetcher = IdlePrefetcher::new((*warm).clone(), config.prefetch.clone());

        Ok(Self {
            config,
            durable,
            keys,
            instant,
            warm,
            session,
            warmup,
            prefetcher,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    pub fn key_builder(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn instant(&self) -> &InstantCache {
        &self.instant
    }

    pub fn warm(&self) -> &WarmCache {
        &self.warm
    }

    pub fn session(&self) -> &SessionCache {
        &self.session
    }

    pub fn warmup(&self) -> &WarmupManager {
        &self.warmup
    }

    pub fn prefetcher(&self) -> &IdlePrefetcher {
        &self.prefetcher
    }

    /// 以 Prometheus 文本格式导出进程内指标
    pub fn metrics_report(&self) -> String {
        get_metrics_string()
    }

    fn caches(&self) -> [&CacheAside; 3] {
        [&*self.instant, &*self.warm, &*self.session]
    }

    /// 退出登录：清空所有命名空间的两层数据，订阅关系保留
    #[instrument(skip(self), level = "info", fields(identity = %Redacted::new(identity)))]
    pub async fn sign_out(&self, identity: &str) -> Result<()> {
        for cache in self.caches() {
            cache.store().clear_all().await?;
        }
        self.warmup.forget(identity).await;
        info!("cache cleared on sign-out");
        Ok(())
    }

    /// 优雅关闭
    ///
    /// 等待进行中的生产者调用写回缓存，然后释放易失层和订阅者。
    #[instrument(skip(self), level = "info")]
    pub async fn shutdown(self) -> Result<()> {
        info!("开始关闭缓存管理器...");
        let start = Instant::now();

        loop {
            let pending: usize = self.caches().iter().map(|c| c.in_flight()).sum();
            if pending == 0 {
                break;
            }
            if start.elapsed() >= SHUTDOWN_GRACE {
                warn!("关闭超时，仍有 {} 个进行中的请求", pending);
                return Err(CacheError::ShutdownError(format!(
                    "{} in-flight requests did not finish within {:?}",
                    pending, SHUTDOWN_GRACE
                )));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for cache in self.caches() {
            cache.store().l1().clear();
            cache.store().bus().clear();
        }
        info!("缓存管理器已关闭");
        Ok(())
    }
}
