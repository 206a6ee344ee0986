//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存系统的指标收集和监控功能。

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{span, Level};

/// 指标收集器
///
/// 用于收集和存储缓存系统的各种运行时指标
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// 请求总数统计
    /// key: "namespace:tier:op:result"
    pub requests_total: Arc<Mutex<HashMap<String, u64>>>,
    /// 操作耗时（累积时间和计数）
    /// key: "namespace:tier:op" -> (total_duration_secs, count)
    pub operation_duration: Arc<Mutex<HashMap<String, (f64, u64)>>>,
    /// 持久层失败次数（降级为仅内存）
    /// key: "namespace:op"
    pub durable_failures: Arc<Mutex<HashMap<String, u64>>>,
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Metrics {
    /// 记录请求指标
    ///
    /// # 参数
    ///
    /// * `namespace` - 缓存命名空间（instant/warm/session）
    /// * `tier` - 层级（volatile/durable/producer）
    /// * `op` - 操作类型（get/set/fetch）
    /// * `result` - 操作结果（hit/miss/stale/rejected）
    pub fn record_request(&self, namespace: &str, tier: &str, op: &str, result: &str) {
        let span = span!(Level::TRACE, "cache_request", namespace, tier, op, result);
        let _enter = span.enter();
        let key = format!("{}:{}:{}:{}", namespace, tier, op, result);
        *locked(&self.requests_total).entry(key).or_insert(0) += 1;
    }

    /// 记录操作耗时
    pub fn record_duration(&self, namespace: &str, tier: &str, op: &str, duration_secs: f64) {
        let key = format!("{}:{}:{}", namespace, tier, op);
        let mut map = locked(&self.operation_duration);
        let entry = map.entry(key).or_insert((0.0, 0));
        entry.0 += duration_secs;
        entry.1 += 1;
    }

    /// 记录持久层失败
    pub fn record_durable_failure(&self, namespace: &str, op: &str) {
        let key = format!("{}:{}", namespace, op);
        *locked(&self.durable_failures).entry(key).or_insert(0) += 1;
    }

    /// 读取单个请求计数
    pub fn request_count(&self, namespace: &str, tier: &str, op: &str, result: &str) -> u64 {
        let key = format!("{}:{}:{}:{}", namespace, tier, op, result);
        locked(&self.requests_total)
            .get(&key)
            .copied()
            .unwrap_or(0)
    }

    /// 读取持久层失败计数
    pub fn durable_failure_count(&self, namespace: &str, op: &str) -> u64 {
        let key = format!("{}:{}", namespace, op);
        locked(&self.durable_failures)
            .get(&key)
            .copied()
            .unwrap_or(0)
    }

    /// 清空所有指标（仅用于测试）
    #[doc(hidden)]
    pub fn reset(&self) {
        locked(&self.requests_total).clear();
        locked(&self.operation_duration).clear();
        locked(&self.durable_failures).clear();
    }
}

/// 获取指标字符串
///
/// 将所有指标格式化为 Prometheus 文本格式
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let mut output = String::new();

    let reqs = locked(&metrics.requests_total);
    let mut keys: Vec<_> = reqs.keys().collect();
    keys.sort();
    for k in keys {
        let parts: Vec<&str> = k.splitn(4, ':').collect();
        if parts.len() == 4 {
            output.push_str(&format!(
                "cache_requests_total{{namespace=\"{}\", tier=\"{}\", operation=\"{}\", result=\"{}\"}} {}\n",
                parts[0], parts[1], parts[2], parts[3], reqs[k]
            ));
        }
    }
    drop(reqs);

    let dur = locked(&metrics.operation_duration);
    for (k, (total, count)) in dur.iter() {
        let parts: Vec<&str> = k.splitn(3, ':').collect();
        if parts.len() == 3 {
            output.push_str(&format!(
                "cache_operation_duration_seconds_sum{{namespace=\"{}\", tier=\"{}\", operation=\"{}\"}} {}\n",
                parts[0], parts[1], parts[2], total
            ));
            output.push_str(&format!(
                "cache_operation_duration_seconds_count{{namespace=\"{}\", tier=\"{}\", operation=\"{}\"}} {}\n",
                parts[0], parts[1], parts[2], count
            ));
        }
    }
    drop(dur);

    for (k, v) in locked(&metrics.durable_failures).iter() {
        if let Some((namespace, op)) = k.split_once(':') {
            output.push_str(&format!(
                "cache_durable_failures_total{{namespace=\"{}\", operation=\"{}\"}} {}\n",
                namespace, op, v
            ));
        }
    }
    output
}
