//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存系统的同步与调度机制：订阅总线、请求合并、会话预热和空闲预取。

pub mod prefetch;
pub mod single_flight;
pub mod subscription;
pub mod warmup;

pub use prefetch::{speculative_window, IdlePrefetcher, PrefetchHandle, PrefetchReport};
pub use single_flight::FlightGroup;
pub use subscription::{Subscription, SubscriptionBus};
pub use warmup::{
    SessionContext, WarmupManager, WarmupPlan, WarmupResult, WarmupStatus, WarmupTask,
};
