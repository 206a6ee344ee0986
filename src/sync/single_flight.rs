//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 进行中请求的合并：同一键的并发未命中共享一次生产者调用。

use crate::error::{CacheError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// 一次共享的进行中请求
pub type Flight = Shared<BoxFuture<'static, Result<Value>>>;

/// 进行中请求表
///
/// 任务通过 `tokio::spawn` 运行，因此即使所有等待者都已离开，生产者也会运行至结束。
#[derive(Clone, Default)]
pub struct FlightGroup {
    in_flight: Arc<DashMap<String, Flight>>,
}

impl FlightGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入键对应的进行中请求；不存在时用 `work` 发起一个新的
    ///
    /// 返回 `(flight, leader)`，`leader` 为 `true` 表示本次调用发起了请求。
    pub fn join_or_start<W, Fut>(&self, key: &str, work: W) -> (Flight, bool)
    where
        W: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                debug!("joining in-flight request: key={}", key);
                (occupied.get().clone(), false)
            }
            Entry::Vacant(vacant) => {
                let in_flight = self.in_flight.clone();
                let owned_key = key.to_string();
                let fut = work();
                let flight = spawn_flight(async move {
                    let result = fut.await;
                    // 在返回结果之前移除，之后到达的调用方会先看到已写入的缓存
                    in_flight.remove(&owned_key);
                    result
                });
                vacant.insert(flight.clone());
                (flight, true)
            }
        }
    }

    /// 不参与合并，单独发起一次请求
    pub fn start_detached<Fut>(&self, fut: Fut) -> Flight
    where
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        spawn_flight(fut)
    }

    /// 当前进行中的请求数
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }
}

fn spawn_flight<Fut>(fut: Fut) -> Flight
where
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let handle = tokio::spawn(fut);
    async move {
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(CacheError::Producer(format!("producer task aborted: {}", e))),
        }
    }
    .boxed()
    .shared()
}
