//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 缓存键构造。
//!
//! 同一逻辑资源名加同一组参数值必须得到同一个键，与参数插入顺序无关，
//! 也与是否携带令牌类参数无关。界面依赖共享键来合并并发请求，并把更新扇出给所有订阅者。

use crate::utils::redaction::DEFAULT_SECRET_FIELDS;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// 身份前缀与资源名之间的分隔符
pub const IDENTITY_SEPARATOR: &str = "::";

/// 规范化后的缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// 直接包装一个已知的键字符串（不做规范化）
    pub fn raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// 为键加上用户身份前缀
    pub fn scoped(&self, identity: &str) -> Self {
        Self(format!("{}{}{}", identity, IDENTITY_SEPARATOR, self.0))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::raw(key)
    }
}

/// 请求参数集合
///
/// 保留插入顺序；同名参数后写覆盖先写。键构造时会重新排序。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    pairs: Vec<(String, Value)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个参数
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.pairs.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.pairs
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

impl From<serde_json::Map<String, Value>> for Params {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

/// 缓存键构造器
///
/// 名称匹配敏感字段正则的参数会被剔除，保证令牌永远不会出现在键中（也就不会被持久化）。
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    denylist: Option<Regex>,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::with_secret_fields(DEFAULT_SECRET_FIELDS.iter().copied())
            .expect("default secret field list is a valid pattern")
    }
}

impl KeyBuilder {
    /// 使用自定义的敏感字段名片段构造
    ///
    /// 片段按字面量匹配（大小写不敏感，子串）。
    pub fn with_secret_fields<I, S>(fields: I) -> crate::error::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = fields
            .into_iter()
            .map(|f| f.as_ref().trim().to_string())
            .filter(|f| !f.is_empty())
            .map(|f| regex::escape(&f))
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { denylist: None });
        }

        let pattern = format!("(?:{})", alternatives.join("|"));
        let denylist = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| crate::error::CacheError::ConfigError(e.to_string()))?;
        Ok(Self {
            denylist: Some(denylist),
        })
    }

    /// 参数名是否被视为敏感字段
    pub fn is_secret(&self, name: &str) -> bool {
        self.denylist
            .as_ref()
            .is_some_and(|denylist| denylist.is_match(name))
    }

    /// 构造规范化键：`name` 或 `name?a=1&b=2`
    pub fn build(&self, name: &str, params: &Params) -> CacheKey {
        let canonical: BTreeMap<&str, String> = params
            .iter()
            .filter(|(k, _)| !self.is_secret(k))
            .filter_map(|(k, v)| render_value(v).map(|rendered| (k, rendered)))
            .collect();

        if canonical.is_empty() {
            return CacheKey(name.to_string());
        }

        let query = canonical
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        CacheKey(format!("{}?{}", name, query))
    }

    /// 构造带用户身份前缀的键
    pub fn build_scoped(&self, identity: &str, name: &str, params: &Params) -> CacheKey {
        self.build(name, params).scoped(identity)
    }
}

/// 使用默认敏感字段列表构造键
pub fn build_key(name: &str, params: &Params) -> CacheKey {
    lazy_static::lazy_static! {
        static ref DEFAULT_BUILDER: KeyBuilder = KeyBuilder::default();
    }
    DEFAULT_BUILDER.build(name, params)
}

/// 渲染参数值；`null` 与渲染结果为空串的值返回 `None`
fn render_value(value: &Value) -> Option<String> {
    let rendered = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(render_value)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_string(),
    };
    if rendered.is_empty() {
        None
    } else {
        Some(rendered)
    }
}
