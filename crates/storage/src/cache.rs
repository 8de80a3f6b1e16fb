//! Best-effort key/value cache with TTLs

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
}

/// String key/value cache.
///
/// Callers treat every error as a miss; an absent backend is modelled by
/// `NoopCache`, where every lookup misses.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn del(&self, key: &str) -> Result<(), CacheError>;
}

/// Thread-safe in-process cache
pub struct MemoryCache {
    /// Map of key -> (value, expiration time)
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Remove expired entries
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expiry)| *expiry > now);
    }

    /// Remove `key` only if it is still expired at `now`.
    ///
    /// A concurrent `set` may have refreshed the entry after it was read.
    fn evict_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, (_, expiry)| *expiry <= now);
    }

    /// Get the number of entries, expired ones included until `cleanup`
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.1 > now => Ok(Some(entry.0.clone())),
            Some(entry) => {
                drop(entry);
                self.evict_expired(key, now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Cache that stores nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn del(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
}
