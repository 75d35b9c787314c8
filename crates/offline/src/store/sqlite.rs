//! SQLite-backed key-value store.
//!
//! Values live in a single `kv_store` table in the app's local database file
//! (`{data_dir}/offline.db`). The pool is opened lazily on first use so the
//! store can be constructed before the data directory is known to exist.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::Mutex;

use super::{KeyValueStore, StorageError};

/// SQLite key-value store.
///
/// Cheap to clone; clones share one pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: Option<PathBuf>,
    /// Externally supplied pool whose table has not been created yet.
    provided: Option<SqlitePool>,
    pool: Arc<Mutex<Option<SqlitePool>>>,
}

impl SqliteStore {
    /// Store backed by the database file at `path` (created if missing).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            provided: None,
            pool: Arc::new(Mutex::new(None)),
        }
    }

    /// Store over an existing pool; the table is created on first use.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            path: None,
            provided: Some(pool),
            pool: Arc::new(Mutex::new(None)),
        }
    }

    /// Private in-memory database, for tests.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::from_pool(pool);
        store.pool().await?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn connect(path: &Path) -> anyhow::Result<SqlitePool> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create data directory at {:?}", parent))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open SQLite database at {:?}", path))
    }

    async fn create_table(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .context("failed to create kv_store table")?;
        Ok(())
    }

    /// Get the pool, opening the database and creating the table if needed.
    async fn pool(&self) -> Result<SqlitePool, StorageError> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        let pool = match (&self.provided, self.path.as_deref()) {
            (Some(pool), _) => pool.clone(),
            (None, Some(path)) => {
                let pool = Self::connect(path)
                    .await
                    .map_err(|e| StorageError::Unavailable(format!("{e:#}")))?;
                tracing::debug!(path = ?path, "opened offline key-value store");
                pool
            }
            (None, None) => {
                return Err(StorageError::Unavailable("no database configured".to_string()));
            }
        };

        Self::create_table(&pool)
            .await
            .map_err(|e| StorageError::Backend(format!("{e:#}")))?;

        *guard = Some(pool.clone());
        Ok(pool)
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let pool = self.pool().await?;

        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get::<String, _>("value")?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let pool = self.pool().await?;

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE
                SET value = excluded.value,
                    updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let pool = self.pool().await?;

        sqlx::query("DELETE FROM kv_store WHERE key = ?1")
            .bind(key)
            .execute(&pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_in_memory() {
        let store = SqliteStore::in_memory().await.unwrap();

        assert_eq!(store.get("pending-wear-events").await.unwrap(), None);

        store.set("pending-wear-events", "{\"a\":1}").await.unwrap();
        store.set("pending-wear-events", "{\"a\":2}").await.unwrap();
        assert_eq!(
            store.get("pending-wear-events").await.unwrap().as_deref(),
            Some("{\"a\":2}")
        );

        store.remove("pending-wear-events").await.unwrap();
        assert_eq!(store.get("pending-wear-events").await.unwrap(), None);

        // Removing an absent key is fine.
        store.remove("pending-wear-events").await.unwrap();
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        store.remove("a").await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn file_backed_store_creates_parent_directory() {
        let dir = std::env::temp_dir().join(format!(
            "wardrobe-offline-test-{}",
            std::process::id()
        ));
        let path = dir.join("nested").join("offline.db");
        let _ = std::fs::remove_dir_all(&dir);

        let store = SqliteStore::open(&path);
        store.set("k", "v").await.unwrap();

        let reopened = SqliteStore::open(&path);
        assert_eq!(reopened.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
