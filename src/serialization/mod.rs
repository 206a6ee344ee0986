//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存条目以及持久层记录的序列化机制。

pub mod json;

use crate::clock::add_duration;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub use json::JsonSerializer;

/// 缓存条目：值加上绝对过期时间
///
/// 只有在 `now < expires_at` 时条目有效。
/// 持久层格式为 `{ "value": ..., "expiresAt": <毫秒时间戳> }`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    #[serde(rename = "expiresAt", with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// 以写入时刻加 TTL 作为过期时间
    pub fn new(value: Value, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: add_duration(now, ttl),
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// 剩余有效时间，已过期返回 `None`
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

/// 序列化器特征
///
/// 定义序列化和反序列化操作的接口
pub trait Serializer: Send + Sync {
    /// 序列化值为字节数组
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// 从字节数组反序列化值
    fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T>;

    /// 编码持久层记录
    fn encode_entry(&self, entry: &CacheEntry) -> Result<Vec<u8>> {
        self.serialize(entry)
    }

    /// 解码持久层记录
    fn decode_entry(&self, data: &[u8]) -> Result<CacheEntry> {
        self.deserialize(data)
    }
}

/// 序列化器枚举
///
/// 用于支持 trait object 的序列化器
#[derive(Clone, Debug)]
pub enum SerializerEnum {
    Json(JsonSerializer),
}

impl Default for SerializerEnum {
    fn default() -> Self {
        SerializerEnum::Json(JsonSerializer::new())
    }
}

impl Serializer for SerializerEnum {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            SerializerEnum::Json(s) => s.serialize(value),
        }
    }

    fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            SerializerEnum::Json(s) => s.deserialize(data),
        }
    }
}
