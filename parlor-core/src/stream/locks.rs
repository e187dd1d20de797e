use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Mutual exclusion scoped per string key, for serializing create/seek/
/// destroy on the same session or media file without ever blocking other
/// keys. Locks are created on demand; entries nobody holds are evicted on
/// the next acquisition, so the registry stays bounded under heavy session
/// churn.
#[derive(Default)]
pub struct KeyedLocks {
    inner: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap();
            // The map holds one reference; anything above that is a holder
            // or a waiter.
            map.retain(|_, entry| Arc::strong_count(entry) > 1);
            Arc::clone(
                map.entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked (held or awaiting eviction).
    pub fn tracked(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes_critical_sections() {
        let locks = Arc::new(KeyedLocks::new());
        let counter = Arc::new(StdMutex::new(0usize));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("session-1").await;
                let before = *counter.lock().unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
                *counter.lock().unwrap() = before + 1;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*counter.lock().unwrap(), 8);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let locks = KeyedLocks::new();
        let guard_a = locks.lock("a").await;
        // Must complete immediately even while "a" is held.
        let guard_b =
            tokio::time::timeout(Duration::from_millis(200), locks.lock("b")).await;
        assert!(guard_b.is_ok());
        drop(guard_a);
    }

    #[tokio::test]
    async fn released_keys_are_reclaimed() {
        let locks = KeyedLocks::new();
        for index in 0..64 {
            let guard = locks.lock(&format!("session-{index}")).await;
            drop(guard);
        }
        // The next acquisition sweeps everything unheld.
        let _guard = locks.lock("fresh").await;
        assert_eq!(locks.tracked(), 1);
    }
}
