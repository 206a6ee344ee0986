//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 敏感信息脱敏工具
//!
//! 提供日志脱敏功能，并定义缓存键构造时需要剔除的敏感参数名片段

use std::fmt;

/// 默认的敏感字段名片段（大小写不敏感，子串匹配）
///
/// 缓存键构造器会丢弃名称包含其中任一片段的参数。
pub const DEFAULT_SECRET_FIELDS: &[&str] = &[
    "token",
    "password",
    "secret",
    "api_key",
    "apikey",
    "authorization",
    "credential",
    "jwt",
    "cookie",
    "private_key",
];

/// 脱敏敏感信息
///
/// # 参数
/// * `value` - 需要脱敏的值
/// * `visible_chars` - 保留的可见字符数
///
/// # 返回值
/// 返回脱敏后的字符串，格式为：`****{last_chars}`
///
/// # 示例
/// ```
/// use tiercache::utils::redaction::redact_value;
/// let masked = redact_value("password123", 3);
/// assert_eq!(masked, "****123");
/// ```
pub fn redact_value(value: &str, visible_chars: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= visible_chars {
        "*".repeat(chars.len())
    } else {
        let tail: String = chars[chars.len() - visible_chars..].iter().collect();
        format!("{}{}", "*".repeat(4), tail)
    }
}

/// 脱敏缓存键
///
/// 键本身不会包含敏感参数（构造时已剔除），
/// 但用户身份作为键前缀出现，这里只保留尾部若干字符，并限制长度以防日志过大。
pub fn redact_cache_key(key: &str) -> String {
    let shown = match key.split_once("::") {
        Some((identity, rest)) => format!("{}::{}", redact_value(identity, 4), rest),
        None => key.to_string(),
    };

    if shown.chars().count() > 100 {
        let head: String = shown.chars().take(97).collect();
        format!("{}...", head)
    } else {
        shown
    }
}

/// 脱敏包装器
///
/// 用于在日志中安全地记录用户身份等值
pub struct Redacted<T: fmt::Display> {
    value: T,
    visible_chars: usize,
}

impl<T: fmt::Display> Redacted<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            visible_chars: 4,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.value.to_string();
        write!(f, "{}", redact_value(&value, self.visible_chars))
    }
}

impl<T: fmt::Display> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}
