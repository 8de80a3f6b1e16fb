//! Best-effort JSON helpers over `Cache`
//!
//! A failing cache backend never fails the caller: reads degrade to a miss,
//! writes and invalidations are dropped, and both are logged.

use exitnet_storage::Cache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

pub(crate) async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Option<T> {
    let raw = match cache.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!("Cache read failed for {}: {}", key, e);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Discarding undecodable cache entry {}: {}", key, e);
            None
        }
    }
}

pub(crate) async fn set_json<T: Serialize>(cache: &dyn Cache, key: &str, value: &T, ttl: Duration) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to encode cache entry {}: {}", key, e);
            return;
        }
    };

    if let Err(e) = cache.set(key, raw, ttl).await {
        warn!("Cache write failed for {}: {}", key, e);
    }
}

pub(crate) async fn invalidate(cache: &dyn Cache, key: &str) {
    if let Err(e) = cache.del(key).await {
        warn!("Cache invalidation failed for {}: {}", key, e);
    }
}

#[cfg(test)]
pub(crate) mod failing {
    use async_trait::async_trait;
    use exitnet_storage::{Cache, CacheError};
    use std::time::Duration;

    /// Backend that is always down
    pub struct FailingCache;

    #[async_trait]
    impl Cache for FailingCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn del(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::failing::FailingCache;
    use super::*;
    use exitnet_storage::MemoryCache;

    #[tokio::test]
    async fn test_json_roundtrip() {
        let cache = MemoryCache::new();
        set_json(&cache, "k", &vec![1.5f64, 2.0], Duration::from_secs(30)).await;

        let value: Option<Vec<f64>> = get_json(&cache, "k").await;
        assert_eq!(value, Some(vec![1.5, 2.0]));

        invalidate(&cache, "k").await;
        assert!(get_json::<Vec<f64>>(&cache, "k").await.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let cache = MemoryCache::new();
        cache
            .set("k", "not json".to_string(), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(get_json::<f64>(&cache, "k").await.is_none());
    }

    #[tokio::test]
    async fn test_failing_backend_degrades() {
        let cache = FailingCache;
        set_json(&cache, "k", &1.0f64, Duration::from_secs(30)).await;
        assert!(get_json::<f64>(&cache, "k").await.is_none());
        invalidate(&cache, "k").await;
    }
}
