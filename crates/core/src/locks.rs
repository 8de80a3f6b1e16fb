//! Per-key mutation locks
//!
//! Mutations of one entity are read-modify-write against the store, so every
//! operation holds the lock of each key it touches for its whole duration.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct KeyedLocks {
    /// Map of key -> mutex
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Guard over one or two keys
pub struct PairGuard {
    _first: OwnedMutexGuard<()>,
    _second: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn mutex(&self, key: &str) -> Arc<Mutex<()>> {
        // The map shard guard is released before the caller awaits
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.mutex(key).lock_owned().await
    }

    /// Lock two keys in sorted order so concurrent callers cannot deadlock
    pub async fn lock_pair(&self, a: &str, b: &str) -> PairGuard {
        if a == b {
            return PairGuard {
                _first: self.lock(a).await,
                _second: None,
            };
        }

        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(low).await;
        let second = self.lock(high).await;
        PairGuard {
            _first: first,
            _second: Some(second),
        }
    }

    /// Drop entries nobody holds or waits on
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_excludes_same_key() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock("w1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("w1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        let _b = locks.lock("b").await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_lock_pair_same_key_collapses() {
        let locks = KeyedLocks::new();
        let guard = locks.lock_pair("w1", "w1").await;
        assert!(guard._second.is_none());
    }

    #[tokio::test]
    async fn test_lock_pair_opposite_order() {
        let locks = Arc::new(KeyedLocks::new());

        let mut tasks = Vec::new();
        for i in 0..20 {
            let locks = locks.clone();
            tasks.push(tokio::spawn(async move {
                let _g = if i % 2 == 0 {
                    locks.lock_pair("host", "client").await
                } else {
                    locks.lock_pair("client", "host").await
                };
                tokio::task::yield_now().await;
            }));
        }

        let all = futures_join(tasks);
        tokio::time::timeout(Duration::from_secs(5), all)
            .await
            .expect("lock_pair deadlocked");
    }

    async fn futures_join(tasks: Vec<tokio::task::JoinHandle<()>>) {
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = KeyedLocks::new();
        let held = locks.lock("held").await;
        drop(locks.lock("idle").await);

        locks.prune();
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }
}
