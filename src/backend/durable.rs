//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 持久层接口：重启（页面重载）后仍然存在的键值存储。

use crate::error::Result;
use async_trait::async_trait;

/// 持久层键值存储
///
/// 值是已编码的记录字节。实现可以失败（容量不足、存储不可用），
/// 上层存储会吞掉这些错误并降级为仅内存模式。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    /// 读取记录
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// 写入（覆盖）记录
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// 删除记录，键不存在时不报错
    async fn delete(&self, key: &str) -> Result<()>;

    /// 删除所有以 `prefix` 开头的记录，返回删除数量
    async fn clear_prefix(&self, prefix: &str) -> Result<usize>;

    /// 列出所有以 `prefix` 开头的键（按字典序）
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// 后端名称，用于日志和指标
    fn name(&self) -> &'static str;
}
