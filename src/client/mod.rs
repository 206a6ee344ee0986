//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存客户端的接口和实现。

pub mod cache_aside;
pub mod dual_tier;
pub mod facade;
pub mod resource;
pub mod validator;

use crate::error::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::instrument;

pub use cache_aside::{CacheAside, FetchOptions};
pub use dual_tier::{DualTierStore, StoreOptions};
pub use facade::{InstantCache, SessionCache, WarmCache};
pub use resource::{CachedResource, ResourceState};
pub use validator::Validator;

/// 缓存扩展特征
///
/// 在值操作之上提供类型安全的读写
#[async_trait]
pub trait CacheExt: CacheOps {
    /// 获取缓存值并反序列化
    ///
    /// 值无法转换为 `T` 时返回 `CacheError::Serialization`。
    #[instrument(skip(self), level = "debug")]
    async fn get_typed<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self.get_value(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// 序列化后写入缓存
    #[instrument(skip(self, value), level = "debug")]
    async fn set_typed<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set_value(key, value, ttl).await
    }
}

impl<T: CacheOps + ?Sized> CacheExt for T {}

/// 缓存操作特征
///
/// 定义缓存系统的基本操作接口
#[async_trait]
pub trait CacheOps: Send + Sync {
    /// 获取缓存值
    ///
    /// # 参数
    ///
    /// * `key` - 缓存键
    ///
    /// # 返回值
    ///
    /// 返回新鲜的缓存值，不存在或已过期则返回None
    async fn get_value(&self, key: &str) -> Result<Option<Value>>;

    /// 设置缓存值
    ///
    /// # 参数
    ///
    /// * `key` - 缓存键
    /// * `value` - 缓存值
    /// * `ttl` - 过期时间，None表示使用默认值
    async fn set_value(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// 删除缓存项
    async fn delete(&self, key: &str) -> Result<()>;

    /// 清空缓存
    async fn clear_all(&self) -> Result<()>;

    /// 尝试获取短期标记
    ///
    /// 成功获取返回 true，标记仍然有效则返回 false
    async fn lock(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// 释放标记
    async fn unlock(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl CacheOps for DualTierStore {
    async fn get_value(&self, key: &str) -> Result<Option<Value>> {
        DualTierStore::get(self, key).await
    }

    async fn set_value(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        DualTierStore::set(self, key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        DualTierStore::delete(self, key).await
    }

    async fn clear_all(&self) -> Result<()> {
        DualTierStore::clear_all(self).await
    }

    async fn lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        DualTierStore::lock(self, key, ttl).await
    }

    async fn unlock(&self, key: &str) -> Result<()> {
        DualTierStore::unlock(self, key).await
    }
}
