//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存系统的错误类型和处理机制。

use thiserror::Error;

/// 缓存系统错误类型枚举
///
/// 所有变体只携带字符串信息，因此错误可以被克隆，
/// 并在共享的进行中请求（flight）的多个等待者之间分发。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 持久层操作失败
    #[error("Durable storage operation failed: {0}")]
    Storage(String),

    /// 持久层容量不足
    #[error("Durable storage quota exceeded: needed {needed} bytes, quota {quota} bytes")]
    QuotaExceeded { needed: usize, quota: usize },

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 非法输入（例如键过长）
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 数据生产者（外部请求）失败
    #[error("Producer failed: {0}")]
    Producer(String),

    /// 超时错误
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// 关闭错误
    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<sea_orm::DbErr> for CacheError {
    fn from(e: sea_orm::DbErr) -> Self {
        CacheError::Storage(e.to_string())
    }
}

/// 缓存操作结果类型别名
///
/// 简化错误处理，所有缓存操作都返回此类型
pub type Result<T> = std::result::Result<T, CacheError>;
