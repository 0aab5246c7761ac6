// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed usage cache for fast restart.
//!
//! Stores every origin's usage, access time and registration order, plus a
//! validity flag. The flag is cleared while the engine runs and set again on
//! clean shutdown, so a crash forces a storage rescan on the next start.
//!
//! # Storage
//!
//! ```sql
//! CREATE TABLE origin_usage (
//!     origin_key TEXT PRIMARY KEY,
//!     group_key TEXT NOT NULL,
//!     usage_bytes INTEGER NOT NULL,
//!     last_access_time INTEGER NOT NULL,   -- microseconds
//!     registration_seq INTEGER NOT NULL
//! );
//! CREATE TABLE usage_cache_state (
//!     id INTEGER PRIMARY KEY CHECK (id = 0),
//!     valid INTEGER NOT NULL,
//!     saved_at INTEGER NOT NULL        -- Unix timestamp
//! );
//! ```

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{any::AnyPoolOptions, AnyPool, Row};
use tracing::{debug, info, warn};

use super::traits::{StorageError, UsageCache};
use crate::clock::Timestamp;
use crate::origin::PersistedOrigin;

/// Usage cache persisted in a SQLite file.
pub struct SqliteUsageCache {
    pool: AnyPool,
}

impl SqliteUsageCache {
    /// Open (or create) the cache database at `sqlite_path`.
    pub async fn new(sqlite_path: &str) -> Result<Self, StorageError> {
        sqlx::any::install_default_drivers();

        let url = format!("sqlite://{}?mode=rwc", sqlite_path);

        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&url)
            .await
            .map_err(|e| StorageError::Backend(format!(
                "Failed to open usage cache DB: {}", e
            )))?;

        let cache = Self { pool };
        cache.init_schema().await?;

        info!(path = %sqlite_path, "Usage cache opened");
        Ok(cache)
    }

    /// Create from an existing pool, creating the cache tables if needed.
    pub async fn from_pool(pool: AnyPool) -> Result<Self, StorageError> {
        let cache = Self { pool };
        cache.init_schema().await?;
        Ok(cache)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS origin_usage (
                origin_key TEXT PRIMARY KEY,
                group_key TEXT NOT NULL,
                usage_bytes INTEGER NOT NULL,
                last_access_time INTEGER NOT NULL,
                registration_seq INTEGER NOT NULL
            )
            "#
        )
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!(
                "Failed to create origin_usage table: {}", e
            )))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_cache_state (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                valid INTEGER NOT NULL,
                saved_at INTEGER NOT NULL
            )
            "#
        )
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!(
                "Failed to create usage_cache_state table: {}", e
            )))?;

        Ok(())
    }

    async fn is_valid(&self) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT valid FROM usage_cache_state WHERE id = 0")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!(
                "Failed to read usage cache state: {}", e
            )))?;

        match row {
            Some(row) => {
                let valid: i64 = row.try_get("valid")
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                Ok(valid != 0)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl UsageCache for SqliteUsageCache {
    async fn load(&self) -> Result<Option<Vec<PersistedOrigin>>, StorageError> {
        if !self.is_valid().await? {
            debug!("Usage cache missing or invalid");
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT origin_key, group_key, usage_bytes, last_access_time, registration_seq \
             FROM origin_usage ORDER BY registration_seq"
        )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!(
                "Failed to load usage cache: {}", e
            )))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let origin_key: String = row.try_get("origin_key")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            let group_key: String = row.try_get("group_key")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            let usage_bytes: i64 = row.try_get("usage_bytes")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            let last_access_time: i64 = row.try_get("last_access_time")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            let registration_seq: i64 = row.try_get("registration_seq")
                .map_err(|e| StorageError::Backend(e.to_string()))?;

            if usage_bytes < 0 {
                warn!(origin = %origin_key, usage_bytes, "Negative usage in cache - discarding cache");
                return Ok(None);
            }

            records.push(PersistedOrigin {
                origin_key: origin_key.into(),
                group_key: group_key.into(),
                usage_bytes: usage_bytes as u64,
                last_access_time: Some(Timestamp::from_micros(last_access_time as u64)),
                registration_seq: Some(registration_seq as u64),
            });
        }

        debug!(origins = records.len(), "Loaded usage cache");
        Ok(Some(records))
    }

    async fn store(&self, records: &[PersistedOrigin]) -> Result<(), StorageError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        let mut tx = self.pool.begin().await
            .map_err(|e| StorageError::Backend(format!(
                "Failed to begin usage cache transaction: {}", e
            )))?;

        sqlx::query("DELETE FROM origin_usage")
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Backend(format!(
                "Failed to clear usage cache: {}", e
            )))?;

        for (index, record) in records.iter().enumerate() {
            let access_time = record.last_access_time.unwrap_or(Timestamp::ZERO);
            let seq = record.registration_seq.unwrap_or(index as u64);

            sqlx::query(
                "INSERT INTO origin_usage (origin_key, group_key, usage_bytes, last_access_time, registration_seq) \
                 VALUES (?, ?, ?, ?, ?)"
            )
                .bind(record.origin_key.as_str())
                .bind(record.group_key.as_str())
                .bind(record.usage_bytes as i64)
                .bind(access_time.as_micros() as i64)
                .bind(seq as i64)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::Backend(format!(
                    "Failed to store usage for {}: {}", record.origin_key, e
                )))?;
        }

        sqlx::query(
            r#"
            INSERT INTO usage_cache_state (id, valid, saved_at)
            VALUES (0, 1, ?)
            ON CONFLICT(id) DO UPDATE SET
                valid = excluded.valid,
                saved_at = excluded.saved_at
            "#
        )
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Backend(format!(
                "Failed to mark usage cache valid: {}", e
            )))?;

        tx.commit().await
            .map_err(|e| StorageError::Backend(format!(
                "Failed to commit usage cache: {}", e
            )))?;

        info!(origins = records.len(), "Usage cache saved");
        Ok(())
    }

    async fn invalidate(&self) -> Result<(), StorageError> {
        sqlx::query("UPDATE usage_cache_state SET valid = 0 WHERE id = 0")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!(
                "Failed to invalidate usage cache: {}", e
            )))?;

        Ok(())
    }
}
