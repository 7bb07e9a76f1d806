//! Cache tier
//!
//! Fast key/value store in front of the summary table. Two well-known keys
//! are held: the denormalized aggregate snapshot and the total submission
//! count. Values are JSON text so any backend can store them.
//!
//! Backends report every failure as [`Error::CacheUnavailable`]; callers on
//! the read path treat that as a miss.

mod database;
mod memory;

pub use database::DatabaseCache;
pub use memory::MemoryCache;

use crate::config::{CacheBackendKind, CacheConfig};
use crate::db::AggregateItem;
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cache key of the per-category aggregate snapshot
pub const AGGREGATE_SNAPSHOT_KEY: &str = "aggregate_snapshot";

/// Cache key of the total submission count
pub const TOTAL_SUBMISSIONS_KEY: &str = "total_submission_count";

/// Lifetime of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTtl {
    /// Valid until explicitly replaced or invalidated
    Forever,
    /// Expires after the given duration
    Expires(Duration),
}

impl CacheTtl {
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            CacheTtl::Forever => None,
            CacheTtl::Expires(duration) => Some(duration),
        }
    }
}

/// Storage behind the cache tier
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Stored value, `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store or replace a value
    async fn set(&self, key: &str, value: String, ttl: CacheTtl) -> Result<()>;

    /// Remove a value; removing an absent key succeeds
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Typed access to the two aggregate cache keys
#[derive(Clone)]
pub struct CacheTier {
    backend: Arc<dyn CacheBackend>,
}

impl std::fmt::Debug for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheTier")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl CacheTier {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Build the backend selected by configuration
    pub fn from_config(config: &CacheConfig, pool: &SqlitePool) -> Self {
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendKind::Database => Arc::new(DatabaseCache::new(pool.clone())),
            CacheBackendKind::Memory => Arc::new(MemoryCache::new(config.max_capacity)),
        };
        debug!(backend = backend.name(), "Cache tier configured");
        Self::new(backend)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn get_snapshot(&self) -> Result<Option<Vec<AggregateItem>>> {
        self.get_json(AGGREGATE_SNAPSHOT_KEY).await
    }

    pub async fn set_snapshot(&self, items: &[AggregateItem], ttl: CacheTtl) -> Result<()> {
        self.set_json(AGGREGATE_SNAPSHOT_KEY, &items, ttl).await
    }

    pub async fn get_total_submissions(&self) -> Result<Option<i64>> {
        self.get_json(TOTAL_SUBMISSIONS_KEY).await
    }

    pub async fn set_total_submissions(&self, count: i64, ttl: CacheTtl) -> Result<()> {
        self.set_json(TOTAL_SUBMISSIONS_KEY, &count, ttl).await
    }

    /// Drop both aggregate keys so the next read falls through to storage
    pub async fn invalidate(&self) -> Result<()> {
        self.backend.delete(AGGREGATE_SNAPSHOT_KEY).await?;
        self.backend.delete(TOTAL_SUBMISSIONS_KEY).await?;
        debug!(backend = self.backend.name(), "Invalidated aggregate cache");
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(text) = self.backend.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // Unreadable entries behave as misses and get overwritten on backfill
                warn!(key, error = %e, "Discarding unreadable cache entry");
                Ok(None)
            }
        }
    }

    async fn set_json<T: serde::Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: CacheTtl,
    ) -> Result<()> {
        let text = serde_json::to_string(value)
            .map_err(|e| Error::Internal(format!("Failed to encode cache value {}: {}", key, e)))?;
        self.backend.set(key, text, ttl).await
    }
}
