//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! tiercache - 客户端双层数据缓存库
//!
//! 提供易失层（进程内存）与持久层（SQLite）组成的双层缓存，
//! 支持规范化缓存键、按键订阅、并发请求合并、过期后台刷新、
//! 会话预热和空闲预取等功能。

#![doc(html_root_url = "https://docs.rs/tiercache/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod backend;
pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod key;
pub mod manager;
pub mod metrics;
pub mod serialization;
pub mod sync;
pub mod utils;

// Re-export commonly used items
pub use backend::{DurableStore, MemoryDurableStore, SqliteDurableStore};
pub use client::{
    CacheAside, CacheExt, CacheOps, CachedResource, DualTierStore, FetchOptions, InstantCache,
    ResourceState, SessionCache, StoreOptions, Validator, WarmCache,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{CacheError, Result};
pub use key::{build_key, CacheKey, KeyBuilder, Params};
pub use manager::CacheManager;
pub use sync::warmup::{
    SessionContext, WarmupManager, WarmupPlan, WarmupResult, WarmupStatus, WarmupTask,
};
pub use sync::{IdlePrefetcher, PrefetchHandle, PrefetchReport, Subscription};

/// tiercache 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
