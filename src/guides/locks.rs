//! Keyed advisory locks
//!
//! Serializes work per key (generation fingerprint, subscription external
//! ref) within this process. Entries are created on first use and reused for
//! the process lifetime; the key space is bounded by distinct fingerprints
//! seen, which is small relative to memory.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A registry of per-key async mutexes.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting if another task holds it. The
    /// returned guard releases on drop, including on panic or cancellation.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Try to acquire without waiting. Used by tests to observe contention.
    pub fn try_acquire(&self, key: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_excludes() {
        let locks = KeyedLocks::new();
        let guard = locks.acquire("fp-1").await;
        assert!(locks.try_acquire("fp-1").is_none());
        drop(guard);
        assert!(locks.try_acquire("fp-1").is_some());
    }

    #[tokio::test]
    async fn test_different_keys_are_independent() {
        let locks = KeyedLocks::new();
        let _guard = locks.acquire("fp-1").await;
        assert!(locks.try_acquire("fp-2").is_some());
    }

    #[tokio::test]
    async fn test_waiters_proceed_in_turn() {
        let locks = KeyedLocks::new();
        let guard = locks.acquire("fp-race").await;

        let locks2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = locks2.acquire("fp-race").await;
            true
        });

        // The waiter cannot finish while we hold the lock
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        assert!(waiter.await.unwrap());
    }
}
