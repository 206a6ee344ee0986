//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 基于内存的持久层实现，可选字节配额。

use super::DurableStore;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

/// 内存持久层
///
/// 克隆后共享同一份数据，可用来模拟同一存储被"重载"后的新存储实例读取。
/// 设置配额后，超过配额的写入返回 `CacheError::QuotaExceeded`，
/// 行为与浏览器存储配额耗尽一致。
#[derive(Clone, Default)]
pub struct MemoryDurableStore {
    data: Arc<DashMap<String, Vec<u8>>>,
    used_bytes: Arc<AtomicUsize>,
    quota_bytes: Option<usize>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建带字节配额的存储（按键长加值长计）
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// 已使用字节数
    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 直接读取原始记录，便于检查持久层内容
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.data.get(key).map(|v| v.value().clone())
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.raw(key))
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let incoming = key.len() + value.len();

        match self.data.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let previous = key.len() + occupied.get().len();
                if let Some(quota) = self.quota_bytes {
                    let needed = self.used_bytes().saturating_sub(previous) + incoming;
                    if needed > quota {
                        return Err(CacheError::QuotaExceeded { needed, quota });
                    }
                }
                occupied.insert(value);
                self.used_bytes.fetch_sub(previous, Ordering::SeqCst);
                self.used_bytes.fetch_add(incoming, Ordering::SeqCst);
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                if let Some(quota) = self.quota_bytes {
                    let needed = self.used_bytes() + incoming;
                    if needed > quota {
                        return Err(CacheError::QuotaExceeded { needed, quota });
                    }
                }
                vacant.insert(value);
                self.used_bytes.fetch_add(incoming, Ordering::SeqCst);
            }
        }
        debug!("memory durable set: key={}, bytes={}", key, incoming);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, key: &str) -> Result<()> {
        if let Some((k, v)) = self.data.remove(key) {
            self.used_bytes.fetch_sub(k.len() + v.len(), Ordering::SeqCst);
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn clear_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.keys(prefix).await?;
        for key in &keys {
            self.delete(key).await?;
        }
        Ok(keys.len())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
