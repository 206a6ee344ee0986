//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存系统的存储后端：L1 易失层与可替换的持久层。

pub mod durable;
pub mod l1;
pub mod memory;
pub mod sqlite;

pub use durable::DurableStore;
pub use l1::L1Backend;
pub use memory::MemoryDurableStore;
pub use sqlite::SqliteDurableStore;
