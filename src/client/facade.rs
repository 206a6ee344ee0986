//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 三个具名缓存门面：同一套双层存储，按命名空间和默认 TTL 区分用途。

use super::cache_aside::CacheAside;
use super::dual_tier::{DualTierStore, StoreOptions};
use crate::backend::DurableStore;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

macro_rules! cache_facade {
    ($(#[$meta:meta])* $name:ident, $namespace:literal, $ttl_secs:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        pub struct $name {
            inner: CacheAside,
        }

        impl $name {
            /// 命名空间
            pub const NAMESPACE: &'static str = $namespace;
            /// 默认 TTL
            pub const DEFAULT_TTL: Duration = Duration::from_secs($ttl_secs);

            /// 使用默认选项创建
            pub fn new(durable: Arc<dyn DurableStore>) -> Self {
                let store = DualTierStore::new(Self::store_options(), durable);
                Self::from_aside(CacheAside::new(store))
            }

            /// 该门面的默认存储选项
            pub fn store_options() -> StoreOptions {
                StoreOptions::new(Self::NAMESPACE, Self::DEFAULT_TTL)
            }

            pub fn from_aside(inner: CacheAside) -> Self {
                Self { inner }
            }

            pub fn into_inner(self) -> CacheAside {
                self.inner
            }
        }

        impl Deref for $name {
            type Target = CacheAside;

            fn deref(&self) -> &CacheAside {
                &self.inner
            }
        }
    };
}

cache_facade!(
    /// 短期缓存：列表筛选、看板计数等频繁变化的数据
    InstantCache,
    "instant",
    30
);

cache_facade!(
    /// 中期缓存：楼宇列表、未结工单等预热目标
    WarmCache,
    "warm",
    300
);

cache_facade!(
    /// 会话级缓存：会话信息、角色范围内的汇总数据
    SessionCache,
    "session",
    900
);
