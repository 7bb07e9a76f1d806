//! In-process cache backend using moka
//!
//! Per-entry lifetimes come from the [`CacheTtl`] stored alongside each value.
//! Contents are private to one process, so an out-of-band rebuild from
//! another process is not visible here until the entries are replaced.

use super::{CacheBackend, CacheTtl};
use crate::Result;
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CachedValue {
    text: String,
    ttl: CacheTtl,
}

struct ValueExpiry;

impl Expiry<String, CachedValue> for ValueExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl.as_duration()
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl.as_duration()
    }
}

#[derive(Clone)]
pub struct MemoryCache {
    inner: Cache<String, CachedValue>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(ValueExpiry)
                .build(),
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.get(key).await.map(|value| value.text))
    }

    async fn set(&self, key: &str, value: String, ttl: CacheTtl) -> Result<()> {
        self.inner
            .insert(key.to_string(), CachedValue { text: value, ttl })
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.invalidate(key).await;
        Ok(())
    }
}
