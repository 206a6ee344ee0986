//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了L1缓存后端的实现，基于内存的易失层。

use crate::serialization::CacheEntry;
use moka::future::Cache;
use tracing::{debug, instrument};

/// L1缓存后端实现
///
/// 基于Moka的进程内缓存。新鲜度判断由上层存储按时钟完成，
/// 这里只负责保存条目，因此不配置 Moka 自身的过期策略。
#[derive(Clone)]
pub struct L1Backend {
    cache: Cache<String, CacheEntry>,
}

impl L1Backend {
    /// 创建新的L1缓存后端实例
    ///
    /// # 参数
    ///
    /// * `capacity` - 最大条目数
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(capacity).build(),
        }
    }

    /// 读取条目（不做新鲜度检查）
    #[instrument(skip(self), level = "debug")]
    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.cache.get(key).await;
        debug!("L1 get_entry: key={}, found={}", key, entry.is_some());
        entry
    }

    /// 写入条目，覆盖同键旧值
    #[instrument(skip(self, entry), level = "debug")]
    pub async fn insert(&self, key: &str, entry: CacheEntry) {
        debug!("L1 insert: key={}, expires_at={}", key, entry.expires_at);
        self.cache.insert(key.to_string(), entry).await;
    }

    /// 删除条目
    #[instrument(skip(self), level = "debug")]
    pub async fn remove(&self, key: &str) {
        self.cache.remove(key).await;
        debug!("L1 remove: key={}", key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// 清空 L1 缓存
    #[instrument(skip(self), level = "debug")]
    pub fn clear(&self) {
        self.cache.invalidate_all();
        debug!("L1 clear: 缓存已清空");
    }

    /// 近似条目数
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
