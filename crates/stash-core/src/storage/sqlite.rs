//! SQLite key-value store (embedded, no external services)

use crate::ports::{KvStore, StoreFactory};
use crate::{Result, StashError};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

/// Opens SQLite-backed stores that share one connection pool
pub struct SqliteStoreFactory {
    pool: Arc<SqlitePool>,
}

impl SqliteStoreFactory {
    pub async fn new(database_path: &Path) -> Result<Self> {
        tracing::info!("Opening SQLite database at: {}", database_path.display());

        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;
        tracing::debug!("SQLite key-value table ready");

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (namespace, key)
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StoreFactory for SqliteStoreFactory {
    async fn open(&self, namespace: &str) -> Result<Arc<dyn KvStore>> {
        Ok(Arc::new(SqliteStore {
            pool: self.pool.clone(),
            namespace: namespace.to_string(),
        }))
    }
}

/// One namespace inside the shared `kv_entries` table
pub struct SqliteStore {
    pool: Arc<SqlitePool>,
    namespace: String,
}

impl SqliteStore {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT value FROM kv_entries WHERE namespace = ? AND key = ?")
                .bind(&self.namespace)
                .bind(key)
                .fetch_optional(&*self.pool)
                .await?;

        raw.map(|text| {
            serde_json::from_str(&text).map_err(|e| {
                StashError::Storage(format!(
                    "corrupt value for {}/{}: {}",
                    self.namespace, key, e
                ))
            })
        })
        .transpose()
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        let text = serde_json::to_string(&value)?;

        sqlx::query(
            r#"
            INSERT INTO kv_entries (namespace, key, value, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(namespace, key)
            DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.namespace)
        .bind(key)
        .bind(text)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_entries WHERE namespace = ? AND key = ?")
            .bind(&self.namespace)
            .bind(key)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }
}
