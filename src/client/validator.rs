//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 结果校验器：决定生产者返回的数据是否允许写入缓存。

use serde_json::Value;
use std::sync::Arc;

/// 结果校验器
///
/// 返回 `false` 时结果照常返回给调用方，但不写入任何一层缓存。
pub type Validator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// 兼容旧行为的形状校验
///
/// 接受数组，或 `ok`/`success` 字段为真值的对象；其余（包括标量和 `null`）一律拒绝。
pub fn shape_guard() -> Validator {
    Arc::new(|value: &Value| match value {
        Value::Array(_) => true,
        Value::Object(map) => ["ok", "success"]
            .iter()
            .any(|field| map.get(*field).is_some_and(is_truthy)),
        _ => false,
    })
}

/// 接受任何结果
pub fn accept_all() -> Validator {
    Arc::new(|_: &Value| true)
}

/// 接受除 `null` 以外的结果
pub fn non_null() -> Validator {
    Arc::new(|value: &Value| !value.is_null())
}

/// 从任意谓词构造校验器
pub fn from_fn<F>(predicate: F) -> Validator
where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
{
    Arc::new(predicate)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
