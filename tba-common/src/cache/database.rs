//! Cache backend stored in the `cache_entries` table
//!
//! Shared by every process that opens the same database, so a rebuild run
//! from the admin CLI refreshes what the server serves.

use super::{CacheBackend, CacheTtl};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct DatabaseCache {
    db: SqlitePool,
}

impl DatabaseCache {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Remove entries whose lifetime has passed; returns rows deleted
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM cache_entries WHERE expires_at_ms IS NOT NULL AND expires_at_ms <= ?",
        )
        .bind(Utc::now().timestamp_millis())
        .execute(&self.db)
        .await
        .map_err(unavailable)?;
        Ok(result.rows_affected())
    }
}

fn unavailable(e: sqlx::Error) -> Error {
    Error::CacheUnavailable(e.to_string())
}

#[async_trait]
impl CacheBackend for DatabaseCache {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT value FROM cache_entries
            WHERE cache_key = ?
              AND (expires_at_ms IS NULL OR expires_at_ms > ?)
            "#,
        )
        .bind(key)
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.db)
        .await
        .map_err(unavailable)
    }

    async fn set(&self, key: &str, value: String, ttl: CacheTtl) -> Result<()> {
        let expires_at_ms = ttl
            .as_duration()
            .map(|ttl| Utc::now().timestamp_millis() + ttl.as_millis() as i64);

        sqlx::query(
            r#"
            INSERT INTO cache_entries (cache_key, value, expires_at_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                value = excluded.value,
                expires_at_ms = excluded.expires_at_ms
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at_ms)
        .execute(&self.db)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_entries WHERE cache_key = ?")
            .bind(key)
            .execute(&self.db)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
