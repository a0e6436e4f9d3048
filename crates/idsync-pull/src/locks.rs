//! Keyed mutual exclusion for entities touched by a run.
//!
//! Every step for one target (matching, hooks, mutation, report) runs under
//! its key. Tasks acquire the external UID key before any entity key; a task
//! holding an entity key may acquire further entity keys only through
//! [`EntityLocks::lock_all`], which takes them in sorted order.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::entity::EntityKey;

/// Key of a lockable target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    /// A source object, before it is matched.
    External { object_class: String, uid: String },
    /// An internal entity.
    Entity(EntityKey),
}

impl LockKey {
    pub fn external(object_class: impl Into<String>, uid: impl Into<String>) -> Self {
        Self::External {
            object_class: object_class.into(),
            uid: uid.into(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::External { object_class, uid } => write!(f, "{object_class}:{uid}"),
            LockKey::Entity(key) => write!(f, "entity:{key}"),
        }
    }
}

type LockTable = DashMap<LockKey, Arc<Mutex<()>>>;

/// Held locks. Dropping releases them and evicts table entries no other
/// task is waiting on.
#[must_use = "locks are released when the guard is dropped"]
pub struct LockGuard {
    keys: Vec<LockKey>,
    guards: Vec<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl LockGuard {
    #[must_use]
    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }

    #[must_use]
    pub fn holds(&self, key: &LockKey) -> bool {
        self.keys.contains(key)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.guards.clear();
        // the table's own handle is the last one once nobody waits
        for key in &self.keys {
            self.table
                .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("keys", &self.keys).finish()
    }
}

/// Lock table scoped to one run.
#[derive(Default)]
pub struct EntityLocks {
    table: Arc<LockTable>,
}

impl EntityLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // the shard guard must not live across an await
    fn mutex_for(&self, key: &LockKey) -> Arc<Mutex<()>> {
        self.table.entry(key.clone()).or_default().value().clone()
    }

    /// Acquire a single key.
    pub async fn lock(&self, key: LockKey) -> LockGuard {
        trace!(key = %key, "Acquiring lock");
        let guard = self.mutex_for(&key).lock_owned().await;
        LockGuard {
            keys: vec![key],
            guards: vec![guard],
            table: self.table.clone(),
        }
    }

    /// Acquire several keys in sorted order, skipping duplicates.
    pub async fn lock_all(&self, keys: impl IntoIterator<Item = LockKey>) -> LockGuard {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            trace!(key = %key, "Acquiring lock");
            guards.push(self.mutex_for(key).lock_owned().await);
        }
        LockGuard {
            keys,
            guards,
            table: self.table.clone(),
        }
    }

    /// Number of keys currently held or waited on.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(EntityLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let key = LockKey::Entity(EntityKey::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let (locks, inside, max_inside, key) =
                (locks.clone(), inside.clone(), max_inside.clone(), key.clone());
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(key).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = EntityLocks::new();
        let _a = locks.lock(LockKey::external("user", "a")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock(LockKey::external("user", "b")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_lock_all_sorts_and_dedups() {
        let locks = EntityLocks::new();
        let (a, b) = (EntityKey::new(), EntityKey::new());
        let guard = locks
            .lock_all(vec![
                LockKey::Entity(b),
                LockKey::Entity(a),
                LockKey::Entity(b),
            ])
            .await;

        assert_eq!(guard.keys().len(), 2);
        assert!(guard.keys()[0] <= guard.keys()[1]);
        assert!(guard.holds(&LockKey::Entity(a)));
    }

    #[tokio::test]
    async fn test_entry_kept_while_a_task_waits() {
        let locks = Arc::new(EntityLocks::new());
        let key = LockKey::Entity(EntityKey::new());
        let held = locks.lock(key.clone()).await;

        let waiter = {
            let (locks, key) = (locks.clone(), key.clone());
            tokio::spawn(async move {
                let _guard = locks.lock(key).await;
            })
        };
        while Arc::strong_count(&locks.mutex_for(&key)) < 4 {
            tokio::task::yield_now().await;
        }

        drop(held);
        assert_eq!(locks.len(), 1);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_released_on_drop() {
        let locks = EntityLocks::new();
        let key = LockKey::external("group", "cn=staff");
        drop(locks.lock(key.clone()).await);
        assert!(locks.is_empty());
        let again = tokio::time::timeout(Duration::from_millis(100), locks.lock(key)).await;
        assert!(again.is_ok());
    }
}
