// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable on-device record store backed by a single SQLite file.
//!
//! Every collection shares one table; records are stored as JSON text:
//! ```sql
//! CREATE TABLE records (
//!   collection TEXT NOT NULL,
//!   key        TEXT NOT NULL,
//!   body       TEXT NOT NULL,   -- the record, serialized JSON
//!   PRIMARY KEY (collection, key)
//! )
//! ```
//!
//! Insertion order is the implicit `rowid`. The upsert uses
//! `ON CONFLICT .. DO UPDATE`, which keeps the row (and its rowid) in place, so
//! overwriting a queue item does not move it to the back of the queue.
//!
//! Index lookups compare `CAST(json_extract(body, '$.<field>') AS TEXT)` with the
//! text form from [`index_text`].

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{any::AnyPoolOptions, AnyPool, Row};
use std::path::Path;
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info};

use super::traits::{index_text, Collection, Durability, RecordStore, StorageError};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn read_body(row: &sqlx::any::AnyRow) -> Result<Value, StorageError> {
    // TEXT comes back as String on SQLite; fall back to bytes just in case
    let body: String = row
        .try_get::<String, _>("body")
        .or_else(|_| {
            row.try_get::<Vec<u8>, _>("body")
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        })
        .map_err(backend)?;
    Ok(serde_json::from_str(&body)?)
}

pub struct SqliteStore {
    pool: AnyPool,
    path: String,
}

impl SqliteStore {
    /// Open (or create) the store file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        install_drivers();

        let path_str = path.as_ref().to_string_lossy().to_string();
        let url = format!("sqlite://{}?mode=rwc", path_str);

        let pool = retry("sqlite_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                // One writer keeps each put/delete strictly ordered behind the last
                .max_connections(1)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&url)
                .await
                .map_err(|e| StorageError::Unavailable(format!("{}: {}", path_str, e)))
        })
        .await?;

        let store = Self {
            pool,
            path: path_str,
        };
        store.enable_wal_mode().await?;
        store.init_schema().await?;

        info!(path = %store.path, "SQLite record store opened");
        Ok(store)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &str {
        &self.path
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(format!("Failed to enable WAL mode: {}", e)))?;

        // NORMAL is crash-safe under WAL; only the last commit can be lost on power loss
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (collection, key)
            )
        "#;

        retry("sqlite_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))
        })
        .await?;

        Ok(())
    }

    /// Run a WAL checkpoint to reclaim disk space after bulk deletes.
    pub async fn checkpoint(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("WAL checkpoint failed: {}", e)))?;

        debug!(path = %self.path, "WAL checkpoint completed");
        Ok(())
    }

    /// Close the pool, flushing outstanding connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn durability(&self) -> Durability {
        Durability::Durable
    }

    async fn get(&self, collection: &Collection, key: &str) -> Result<Option<Value>, StorageError> {
        let row = retry("sqlite_get", &RetryConfig::query(), || async {
            sqlx::query("SELECT body FROM records WHERE collection = ? AND key = ?")
                .bind(collection.name)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        row.as_ref().map(read_body).transpose()
    }

    async fn get_all(&self, collection: &Collection) -> Result<Vec<Value>, StorageError> {
        let rows = retry("sqlite_get_all", &RetryConfig::query(), || async {
            sqlx::query("SELECT body FROM records WHERE collection = ? ORDER BY rowid")
                .bind(collection.name)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        rows.iter().map(read_body).collect()
    }

    async fn get_by_index(
        &self,
        collection: &Collection,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Value>, StorageError> {
        collection.check_index(index)?;
        let Some(wanted) = index_text(value) else {
            return Ok(Vec::new());
        };
        let json_path = format!("$.{}", index);

        let rows = retry("sqlite_get_by_index", &RetryConfig::query(), || async {
            sqlx::query(
                "SELECT body FROM records
                 WHERE collection = ? AND CAST(json_extract(body, ?) AS TEXT) = ?
                 ORDER BY rowid",
            )
            .bind(collection.name)
            .bind(json_path.as_str())
            .bind(wanted.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)
        })
        .await?;

        rows.iter().map(read_body).collect()
    }

    async fn put(&self, collection: &Collection, record: &Value) -> Result<(), StorageError> {
        let key = collection.key_of(record)?;
        let body = serde_json::to_string(record)?;

        retry("sqlite_put", &RetryConfig::query(), || async {
            sqlx::query(
                "INSERT INTO records (collection, key, body) VALUES (?, ?, ?)
                 ON CONFLICT(collection, key) DO UPDATE SET body = excluded.body",
            )
            .bind(collection.name)
            .bind(key)
            .bind(body.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)
        })
        .await?;

        Ok(())
    }

    async fn delete(&self, collection: &Collection, key: &str) -> Result<(), StorageError> {
        retry("sqlite_delete", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM records WHERE collection = ? AND key = ?")
                .bind(collection.name)
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        Ok(())
    }

    async fn clear(&self, collection: &Collection) -> Result<u64, StorageError> {
        let result = retry("sqlite_clear", &RetryConfig::query(), || async {
            sqlx::query("DELETE FROM records WHERE collection = ?")
                .bind(collection.name)
                .execute(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        Ok(result.rows_affected())
    }

    async fn scan(
        &self,
        collection: &Collection,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Value>, StorageError> {
        let rows = retry("sqlite_scan", &RetryConfig::query(), || async {
            let page = match after {
                Some(cursor) => sqlx::query(
                    "SELECT body FROM records WHERE collection = ? AND key > ? ORDER BY key LIMIT ?",
                )
                .bind(collection.name)
                .bind(cursor)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await,
                None => sqlx::query("SELECT body FROM records WHERE collection = ? ORDER BY key LIMIT ?")
                    .bind(collection.name)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await,
            };
            page.map_err(backend)
        })
        .await?;

        rows.iter().map(read_body).collect()
    }

    async fn count(&self, collection: &Collection) -> Result<u64, StorageError> {
        let row = retry("sqlite_count", &RetryConfig::query(), || async {
            sqlx::query("SELECT COUNT(*) AS cnt FROM records WHERE collection = ?")
                .bind(collection.name)
                .fetch_one(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        let count: i64 = row.try_get("cnt").map_err(backend)?;
        Ok(count as u64)
    }
}
