//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存系统的配置结构和解析逻辑。

use crate::error::{CacheError, Result};
use crate::utils::redaction::DEFAULT_SECRET_FIELDS;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_VERSION: u32 = 1;

/// 单个 TTL 的上限：30 天
const MAX_TTL_SECS: u64 = 86400 * 30;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub config_version: Option<u32>,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub durable: DurableConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default = "NamespaceConfig::instant")]
    pub instant: NamespaceConfig,
    #[serde(default = "NamespaceConfig::warm")]
    pub warm: NamespaceConfig,
    #[serde(default = "NamespaceConfig::session")]
    pub session: NamespaceConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub warmup: WarmupConfig,
    #[serde(default)]
    pub prefetch: PrefetchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: Some(CONFIG_VERSION),
            global: GlobalConfig::default(),
            durable: DurableConfig::default(),
            cache: CacheConfig::default(),
            instant: NamespaceConfig::instant(),
            warm: NamespaceConfig::warm(),
            session: NamespaceConfig::session(),
            keys: KeysConfig::default(),
            warmup: WarmupConfig::default(),
            prefetch: PrefetchConfig::default(),
        }
    }
}

/// 全局配置
///
/// 定义适用于所有命名空间的默认配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GlobalConfig {
    /// 持久层键前缀，避免与同一存储中的其他数据冲突
    pub key_prefix: String,
    /// 持久层记录是否 gzip 压缩
    pub compress: bool,
    /// 键的最大长度
    pub max_key_length: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            key_prefix: crate::client::dual_tier::DEFAULT_KEY_PREFIX.to_string(),
            compress: false,
            max_key_length: crate::client::dual_tier::DEFAULT_MAX_KEY_LENGTH,
        }
    }
}

/// 持久层类型
#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DurableBackend {
    /// SQLite 文件
    #[default]
    Sqlite,
    /// 进程内存（重启即失）
    Memory,
}

/// 持久层配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DurableConfig {
    pub backend: DurableBackend,
    /// SQLite 文件路径，`:memory:` 表示内存数据库
    pub path: String,
    /// 字节配额，仅对 memory 后端生效
    pub quota_bytes: Option<usize>,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            backend: DurableBackend::Sqlite,
            path: "tiercache.db".to_string(),
            quota_bytes: None,
        }
    }
}

/// 编排器配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CacheConfig {
    /// 是否合并同一键的并发未命中
    pub dedupe_in_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dedupe_in_flight: true,
        }
    }
}

/// 单个命名空间（门面）的配置
#[derive(Deserialize, Clone, Debug)]
pub struct NamespaceConfig {
    /// 默认过期时间（秒）
    pub ttl_secs: u64,
    /// 易失层最大条目数
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

fn default_max_capacity() -> u64 {
    10_000
}

impl NamespaceConfig {
    pub fn instant() -> Self {
        Self {
            ttl_secs: 30,
            max_capacity: 10_000,
        }
    }

    pub fn warm() -> Self {
        Self {
            ttl_secs: 300,
            max_capacity: 10_000,
        }
    }

    pub fn session() -> Self {
        Self {
            ttl_secs: 900,
            max_capacity: 1_000,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// 键构造配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct KeysConfig {
    /// 敏感字段名片段，匹配的参数不会进入键
    pub secret_fields: Vec<String>,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            secret_fields: DEFAULT_SECRET_FIELDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// 会话预热配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct WarmupConfig {
    /// 是否启用预热
    pub enabled: bool,
    /// 防重复标记的有效期（毫秒）
    pub guard_ttl_ms: u64,
    /// 整体超时时间（秒）
    pub timeout_seconds: u64,
    /// 并发任务数
    pub max_concurrency: usize,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            guard_ttl_ms: 5_000,
            timeout_seconds: 30,
            max_concurrency: 4,
        }
    }
}

impl WarmupConfig {
    pub fn guard_ttl(&self) -> Duration {
        Duration::from_millis(self.guard_ttl_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// 空闲预取配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PrefetchConfig {
    pub enabled: bool,
    /// 调度后等待多久开始执行（毫秒）
    pub idle_delay_ms: u64,
    pub max_concurrency: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_delay_ms: 200,
            max_concurrency: 2,
        }
    }
}

impl PrefetchConfig {
    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

impl Config {
    /// 从 TOML 字符串解析并验证
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| CacheError::ConfigError(e.to_string()))?;
        config.validate().map_err(CacheError::ConfigError)?;
        Ok(config)
    }

    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保所有必需的字段都已设置，并且值在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        // 验证配置版本
        if let Some(version) = &self.config_version {
            if *version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        if self.global.key_prefix.is_empty() {
            return Err("Global key_prefix cannot be empty".to_string());
        }

        if self.global.max_key_length == 0 {
            return Err("Global max_key_length cannot be zero".to_string());
        }

        if self.durable.backend == DurableBackend::Sqlite && self.durable.path.is_empty() {
            return Err("Durable path cannot be empty for the sqlite backend".to_string());
        }

        if self.durable.quota_bytes == Some(0) {
            return Err("Durable quota_bytes cannot be zero".to_string());
        }

        for (name, ns) in [
            ("instant", &self.instant),
            ("warm", &self.warm),
            ("session", &self.session),
        ] {
            if ns.ttl_secs == 0 {
                return Err(format!("Namespace '{}' ttl_secs cannot be zero", name));
            }
            if ns.ttl_secs > MAX_TTL_SECS {
                return Err(format!(
                    "Namespace '{}' ttl_secs cannot exceed 30 days (2592000 seconds)",
                    name
                ));
            }
            if ns.max_capacity == 0 {
                return Err(format!("Namespace '{}' max_capacity cannot be zero", name));
            }
        }

        if self.warmup.enabled {
            if self.warmup.guard_ttl_ms == 0 {
                return Err("Warmup guard_ttl_ms cannot be zero".to_string());
            }
            if self.warmup.timeout_seconds == 0 {
                return Err("Warmup timeout_seconds cannot be zero".to_string());
            }
            if self.warmup.max_concurrency == 0 {
                return Err("Warmup max_concurrency cannot be zero".to_string());
            }
        }

        if self.prefetch.enabled && self.prefetch.max_concurrency == 0 {
            return Err("Prefetch max_concurrency cannot be zero".to_string());
        }

        Ok(())
    }
}
