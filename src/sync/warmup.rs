//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 会话预热：登录成功后按角色预先填充高频资源，同一会话在标记有效期内只执行一次。

use crate::client::cache_aside::{CacheAside, FetchOptions};
use crate::client::validator::Validator;
use crate::config::WarmupConfig;
use crate::error::CacheError;
use crate::key::{CacheKey, Params};
use crate::utils::redaction::Redacted;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// 预热防重复标记的资源名
pub const WARMUP_GUARD_NAME: &str = "__warmup_guard";

/// 已登录会话的上下文，由外部认证模块提供
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// 用户标识，不做校验，只用于给键加前缀
    pub identity: String,
    pub role: String,
    /// 用户可访问的范围（如楼宇 ID）
    pub scopes: Vec<String>,
}

impl SessionContext {
    pub fn new(identity: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            role: role.into(),
            scopes: Vec::new(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// 预热标记键
    pub fn guard_key(&self) -> CacheKey {
        CacheKey::raw(WARMUP_GUARD_NAME).scoped(&self.identity)
    }
}

type TaskProducer = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<Value>> + Send>;

/// 单个预热任务
pub struct WarmupTask {
    name: String,
    params: Params,
    ttl: Option<Duration>,
    roles: Vec<String>,
    validator: Option<Validator>,
    producer: TaskProducer,
}

impl fmt::Debug for WarmupTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmupTask")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("ttl", &self.ttl)
            .field("roles", &self.roles)
            .finish()
    }
}

impl WarmupTask {
    pub fn new<F, Fut, T>(name: impl Into<String>, producer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let producer: TaskProducer = Box::new(move || {
            async move {
                let produced = producer().await?;
                Ok::<Value, anyhow::Error>(serde_json::to_value(produced)?)
            }
            .boxed()
        });
        Self {
            name: name.into(),
            params: Params::new(),
            ttl: None,
            roles: Vec::new(),
            validator: None,
            producer,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// 限定允许执行的角色；不设置表示所有角色
    pub fn for_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn allows(&self, role: &str) -> bool {
        self.roles.is_empty() || self.roles.iter().any(|r| r == role)
    }

    /// 任务对应的缓存键
    pub fn key(&self, cache: &CacheAside, identity: &str) -> CacheKey {
        cache.scoped_key(identity, &self.name, &self.params)
    }

    fn options(&self) -> FetchOptions {
        FetchOptions {
            ttl: self.ttl,
            validator: self.validator.clone(),
            force_refresh: false,
        }
    }

    /// 通过编排器执行，不挂接任何订阅者
    pub(crate) async fn run(self, cache: &CacheAside, identity: &str) -> crate::error::Result<()> {
        let key = self.key(cache, identity);
        let options = self.options();
        cache
            .fetch::<Value, _, _>(&key, self.producer, &options)
            .await
            .map(|_| ())
    }
}

/// 预热计划：根据会话生成任务列表
pub trait WarmupPlan: Send + Sync {
    fn tasks(&self, session: &SessionContext) -> Vec<WarmupTask>;
}

impl<F> WarmupPlan for F
where
    F: Fn(&SessionContext) -> Vec<WarmupTask> + Send + Sync,
{
    fn tasks(&self, session: &SessionContext) -> Vec<WarmupTask> {
        self(session)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WarmupStatus {
    Pending,
    InProgress { progress: usize, total: usize },
    Completed { loaded: usize, failed: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WarmupResult {
    pub loaded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub success: bool,
    /// 因标记仍然有效而未执行
    pub guarded: bool,
    pub error: Option<String>,
}

impl WarmupResult {
    pub fn skipped() -> Self {
        Self {
            loaded: 0,
            failed: 0,
            skipped: 1,
            success: true,
            guarded: false,
            error: None,
        }
    }

    pub fn guarded() -> Self {
        Self {
            guarded: true,
            ..Self::skipped()
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            loaded: 0,
            failed: 0,
            skipped: 0,
            success: false,
            guarded: false,
            error: Some(error),
        }
    }
}

/// 预热管理器
///
/// 状态机为 `IDLE -> RUNNING -> IDLE`：进入前在身份前缀键上原子地写入短期标记，
/// 标记有效期内的重复调用直接返回。任务失败只计数，不会中断其余任务。
#[derive(Clone)]
pub struct WarmupManager {
    cache: CacheAside,
    config: WarmupConfig,
    warmup_status: Arc<RwLock<HashMap<String, WarmupStatus>>>,
}

impl WarmupManager {
    pub fn new(cache: CacheAside, config: WarmupConfig) -> Self {
        Self {
            cache,
            config,
            warmup_status: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &WarmupConfig {
        &self.config
    }

    /// 执行预热
    #[instrument(skip(self, session, plan), level = "info", fields(identity = %Redacted::new(&session.identity)))]
    pub async fn warm_up(&self, session: &SessionContext, plan: &dyn WarmupPlan) -> WarmupResult {
        if !self.config.enabled {
            info!("Cache warmup is disabled, skipping");
            return WarmupResult::skipped();
        }

        let guard_key = session.guard_key();
        match self
            .cache
            .store()
            .lock(guard_key.as_str(), self.config.guard_ttl())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("warmup guard is fresh, skipping");
                return WarmupResult::guarded();
            }
            Err(e) => {
                warn!("failed to set warmup guard: {}", e);
                self.set_status(&session.identity, WarmupStatus::Failed { error: e.to_string() })
                    .await;
                return WarmupResult::failed(e.to_string());
            }
        }

        let (tasks, filtered): (Vec<_>, Vec<_>) = plan
            .tasks(session)
            .into_iter()
            .partition(|task| task.allows(&session.role));
        let total = tasks.len();
        info!(
            "Starting cache warmup: tasks={}, filtered_by_role={}",
            total,
            filtered.len()
        );
        self.set_status(&session.identity, WarmupStatus::InProgress { progress: 0, total })
            .await;

        let run = self.run_tasks(session, tasks);
        match tokio::time::timeout(self.config.timeout(), run).await {
            Ok((loaded, failed)) => {
                info!("Cache warmup completed: loaded={}, failed={}", loaded, failed);
                self.set_status(&session.identity, WarmupStatus::Completed { loaded, failed })
                    .await;
                WarmupResult {
                    loaded,
                    failed,
                    skipped: filtered.len(),
                    success: failed == 0,
                    guarded: false,
                    error: None,
                }
            }
            Err(_) => {
                warn!(
                    "Cache warmup timed out after {} seconds",
                    self.config.timeout_seconds
                );
                let error = CacheError::Timeout(format!(
                    "warmup exceeded {} seconds",
                    self.config.timeout_seconds
                ))
                .to_string();
                self.set_status(
                    &session.identity,
                    WarmupStatus::Failed {
                        error: error.clone(),
                    },
                )
                .await;
                WarmupResult::failed(error)
            }
        }
    }

    /// 在后台任务中执行预热
    pub fn spawn_warm_up(
        &self,
        session: SessionContext,
        plan: Arc<dyn WarmupPlan>,
    ) -> JoinHandle<WarmupResult> {
        let manager = self.clone();
        tokio::spawn(async move { manager.warm_up(&session, plan.as_ref()).await })
    }

    async fn run_tasks(&self, session: &SessionContext, tasks: Vec<WarmupTask>) -> (usize, usize) {
        let total = tasks.len();
        let mut loaded = 0usize;
        let mut failed = 0usize;

        let mut results = stream::iter(tasks)
            .map(|task| {
                let name = task.name.clone();
                async move { (name, task.run(&self.cache, &session.identity).await) }
            })
            .buffer_unordered(self.config.max_concurrency.max(1));

        while let Some((name, result)) = results.next().await {
            match result {
                Ok(()) => loaded = loaded.saturating_add(1),
                Err(e) => {
                    debug!("warmup task failed: name={}, error={}", name, e);
                    failed = failed.saturating_add(1);
                }
            }
            self.set_status(
                &session.identity,
                WarmupStatus::InProgress {
                    progress: loaded + failed,
                    total,
                },
            )
            .await;
        }
        (loaded, failed)
    }

    async fn set_status(&self, identity: &str, status: WarmupStatus) {
        self.warmup_status
            .write()
            .await
            .insert(identity.to_string(), status);
    }

    pub async fn status(&self, identity: &str) -> WarmupStatus {
        let status_map = self.warmup_status.read().await;
        status_map
            .get(identity)
            .cloned()
            .unwrap_or(WarmupStatus::Pending)
    }

    /// 清除某个身份的状态记录（退出登录时调用）
    pub async fn forget(&self, identity: &str) {
        self.warmup_status.write().await.remove(identity);
    }
}
