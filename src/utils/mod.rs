//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 统一工具模块
//!
//! 提供库、测试和命令行共用的工具函数，包括：
//! - 日志设置工具
//! - 测试配置创建工具
//! - 命名空间生成工具
//! - 输入验证工具

pub mod redaction;

use crate::config::{Config, DurableBackend};
use crate::error::CacheError;
use std::sync::Once;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// 安装测试用日志订阅器（只生效一次）
pub fn setup_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// 创建使用内存持久层的配置
pub fn create_memory_config(quota_bytes: Option<usize>) -> Config {
    let mut config = Config::default();
    config.durable.backend = DurableBackend::Memory;
    config.durable.quota_bytes = quota_bytes;
    config
}

/// 生成唯一的命名空间或身份标识
pub fn generate_unique_namespace(base: &str) -> String {
    format!("{}_{}", base, uuid::Uuid::new_v4().simple())
}

pub fn validate_key_length(key: &str, max_length: usize) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::InvalidInput(
            "Cache key cannot be empty".to_string(),
        ));
    }
    if key.len() > max_length {
        return Err(CacheError::InvalidInput(format!(
            "Cache key exceeds maximum length of {} bytes (got {} bytes)",
            max_length,
            key.len()
        )));
    }
    Ok(())
}
