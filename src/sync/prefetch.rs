//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 空闲预取：在空闲时段为推测可能访问的范围填充缓存，所属视图卸载时可取消。

use super::warmup::{SessionContext, WarmupTask};
use crate::client::cache_aside::CacheAside;
use crate::config::PrefetchConfig;
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

/// 预取结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    pub loaded: usize,
    pub failed: usize,
    /// 被角色过滤或因取消而未开始的任务
    pub skipped: usize,
    pub cancelled: bool,
}

/// 已调度的预取
///
/// 丢弃句柄会取消尚未开始的任务；已经开始的生产者调用照常完成。
pub struct PrefetchHandle {
    token: CancellationToken,
    guard: DropGuard,
    handle: JoinHandle<PrefetchReport>,
}

impl PrefetchHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待预取结束
    pub async fn join(self) -> PrefetchReport {
        let PrefetchHandle { guard, handle, .. } = self;
        let report = match handle.await {
            Ok(report) => report,
            Err(e) => {
                debug!("prefetch task aborted: {}", e);
                PrefetchReport {
                    cancelled: true,
                    ..PrefetchReport::default()
                }
            }
        };
        // 任务已结束，不需要再触发取消
        let _ = guard.disarm();
        report
    }
}

/// 空闲预取调度器
#[derive(Clone, Debug)]
pub struct IdlePrefetcher {
    cache: CacheAside,
    config: PrefetchConfig,
}

impl IdlePrefetcher {
    pub fn new(cache: CacheAside, config: PrefetchConfig) -> Self {
        Self { cache, config }
    }

    /// 调度一批低优先级任务
    ///
    /// 等待 `idle_delay` 后以有限并发执行；取消后不再启动新任务。
    pub fn schedule(&self, session: &SessionContext, tasks: Vec<WarmupTask>) -> PrefetchHandle {
        let token = CancellationToken::new();
        let child = token.clone();
        let cache = self.cache.clone();
        let config = self.config.clone();
        let identity = session.identity.clone();

        let (tasks, filtered): (Vec<_>, Vec<_>) = tasks
            .into_iter()
            .partition(|task| task.allows(&session.role));

        let handle = tokio::spawn(async move {
            let mut report = PrefetchReport {
                skipped: filtered.len(),
                ..PrefetchReport::default()
            };
            if !config.enabled {
                report.skipped += tasks.len();
                return report;
            }

            tokio::select! {
                _ = child.cancelled() => {
                    report.skipped += tasks.len();
                    report.cancelled = true;
                    return report;
                }
                _ = tokio::time::sleep(config.idle_delay()) => {}
            }

            let total = tasks.len();
            let mut results = stream::iter(tasks)
                .map(|task| {
                    let cache = &cache;
                    let identity = &identity;
                    async move { task.run(cache, identity).await }
                })
                .buffer_unordered(config.max_concurrency.max(1));

            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    next = results.next() => match next {
                        Some(Ok(())) => report.loaded += 1,
                        Some(Err(e)) => {
                            debug!("prefetch task failed: {}", e);
                            report.failed += 1;
                        }
                        None => break,
                    },
                }
            }

            report.skipped += total - report.loaded - report.failed;
            info!(
                "prefetch finished: loaded={}, failed={}, skipped={}, cancelled={}",
                report.loaded, report.failed, report.skipped, report.cancelled
            );
            report
        });

        PrefetchHandle {
            guard: token.clone().drop_guard(),
            token,
            handle,
        }
    }
}

/// 从 `items` 中选出 `after` 之后的 `count` 个元素
///
/// `after` 不在列表中时从头开始选取。
pub fn speculative_window<T: Clone + PartialEq>(items: &[T], after: &T, count: usize) -> Vec<T> {
    let start = items
        .iter()
        .position(|item| item == after)
        .map(|i| i + 1)
        .unwrap_or(0);
    items.iter().skip(start).take(count).cloned().collect()
}
