//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 基于SQLite的持久层实现（通过Sea-ORM访问）。

use super::DurableStore;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Statement,
    Value,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument};

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS cache_entries (
        key TEXT PRIMARY KEY NOT NULL,
        payload BLOB NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

/// SQLite 持久层
#[derive(Clone)]
pub struct SqliteDurableStore {
    db: Arc<DatabaseConnection>,
    location: String,
}

impl std::fmt::Debug for SqliteDurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SqliteDurableStore({})", self.location)
    }
}

impl SqliteDurableStore {
    /// 打开（必要时创建）数据库文件
    #[instrument(skip_all, level = "info", fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CacheError::Storage(format!(
                        "无法创建持久层目录 {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let url = format!("sqlite://{}?mode=rwc", path.display());
        Self::connect(url, path.display().to_string()).await
    }

    /// 进程内的临时数据库
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:".to_string(), ":memory:".to_string()).await
    }

    async fn connect(url: String, location: String) -> Result<Self> {
        let mut opt = ConnectOptions::new(url);
        opt.max_connections(1)
            .min_connections(1)
            .connect_timeout(std::time::Duration::from_secs(30))
            .sqlx_logging(false);

        let db = Database::connect(opt).await?;
        db.execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            CREATE_TABLE_SQL.to_string(),
        ))
        .await?;

        info!("SQLite durable store ready: {}", location);
        Ok(Self {
            db: Arc::new(db),
            location,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn text(value: &str) -> Value {
    Value::String(Some(Box::new(value.to_string())))
}

#[async_trait]
impl DurableStore for SqliteDurableStore {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = self
            .db
            .query_one(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "SELECT payload FROM cache_entries WHERE key = ?1",
                vec![text(key)],
            ))
            .await?;

        match row {
            Some(row) => {
                let payload: Vec<u8> = row.try_get("", "payload")?;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let len = value.len();
        self.db
            .execute(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                r#"
                    INSERT INTO cache_entries (key, payload, updated_at)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET
                        payload = excluded.payload,
                        updated_at = excluded.updated_at
                "#,
                vec![
                    text(key),
                    Value::Bytes(Some(Box::new(value))),
                    Value::BigInt(Some(unix_millis())),
                ],
            ))
            .await?;
        debug!("sqlite durable set: key={}, bytes={}", key, len);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, key: &str) -> Result<()> {
        self.db
            .execute(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "DELETE FROM cache_entries WHERE key = ?1",
                vec![text(key)],
            ))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn clear_prefix(&self, prefix: &str) -> Result<usize> {
        // 不使用 LIKE，避免前缀中的 `_` 与 `%` 被当作通配符
        let result = self
            .db
            .execute(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "DELETE FROM cache_entries WHERE substr(key, 1, length(?1)) = ?1",
                vec![text(prefix)],
            ))
            .await?;
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self), level = "debug")]
    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let rows = self
            .db
            .query_all(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "SELECT key FROM cache_entries WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
                vec![text(prefix)],
            ))
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String>("", "key").map_err(CacheError::from))
            .collect()
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
