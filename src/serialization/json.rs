//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了JSON序列化器的实现。

use super::Serializer;
use crate::error::{CacheError, Result};
use serde::{de::DeserializeOwned, Serialize};

/// gzip 魔数
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// JSON序列化器
///
/// 实现基于serde_json的序列化和反序列化。
/// 启用压缩时写入 gzip 数据；读取时按魔数自动识别，
/// 因此切换压缩开关后旧记录仍然可读。
#[derive(Clone, Debug, Default)]
pub struct JsonSerializer {
    /// 是否启用压缩
    compress: bool,
}

impl JsonSerializer {
    /// 创建新的JSON序列化器
    pub fn new() -> Self {
        Self { compress: false }
    }

    /// 创建启用压缩的JSON序列化器
    pub fn with_compression() -> Self {
        Self { compress: true }
    }

    pub fn is_compressed(&self) -> bool {
        self.compress
    }
}

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let json_bytes = serde_json::to_vec(value)?;

        if !self.compress {
            return Ok(json_bytes);
        }

        #[cfg(feature = "flate2")]
        {
            use flate2::write::GzEncoder;
            use flate2::Compression;
            use std::io::Write;

            let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
            encoder
                .write_all(&json_bytes)
                .map_err(|e| CacheError::Serialization(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| CacheError::Serialization(e.to_string()))
        }

        #[cfg(not(feature = "flate2"))]
        {
            Ok(json_bytes)
        }
    }

    fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        if data.starts_with(&GZIP_MAGIC) {
            #[cfg(feature = "flate2")]
            {
                use flate2::read::GzDecoder;
                use std::io::Read;

                let mut decoder = GzDecoder::new(data);
                let mut decoded = Vec::new();
                decoder
                    .read_to_end(&mut decoded)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                return Ok(serde_json::from_slice(&decoded)?);
            }

            #[cfg(not(feature = "flate2"))]
            {
                return Err(CacheError::Serialization(
                    "compressed record found but flate2 feature is disabled".to_string(),
                ));
            }
        }

        Ok(serde_json::from_slice(data)?)
    }
}
