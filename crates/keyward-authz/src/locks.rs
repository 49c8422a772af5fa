//! Per-binding async locks.
//!
//! Writers of one (subject, permission) pair are serialised; readers never
//! touch these locks. Only one process may write through a given lock table.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Identity of a single binding row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingKey {
    Role { role_id: Uuid, permission_id: Uuid },
    User { user_id: Uuid, permission_id: Uuid },
}

#[derive(Debug, Default)]
pub struct KeyedLocks {
    inner: DashMap<BindingKey, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: BindingKey) -> OwnedMutexGuard<()> {
        let mutex = self
            .inner
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Lock several bindings, always in key order.
    pub async fn lock_many(&self, mut keys: Vec<BindingKey>) -> Vec<OwnedMutexGuard<()>> {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Drop entries nobody holds or waits on.
    pub fn prune(&self) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before - self.inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn key() -> BindingKey {
        BindingKey::User {
            user_id: Uuid::new_v4(),
            permission_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let k = key();

        let guard = locks.lock(k).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(k).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let locks = KeyedLocks::new();
        let held = key();
        let guard = locks.lock(held).await;
        drop(locks.lock(key()).await);

        assert_eq!(locks.len(), 2);
        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 1);
        drop(guard);
        assert_eq!(locks.prune(), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn lock_many_dedups() {
        let locks = KeyedLocks::new();
        let k = key();
        let guards = locks.lock_many(vec![k, key(), k]).await;
        assert_eq!(guards.len(), 2);
    }
}
