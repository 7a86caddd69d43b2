//! Per-object lock table
//!
//! Reads of one object share a lock; writes and deletes take it
//! exclusively. Different objects never contend. Entries are created on
//! first use and pruned when the last guard for a name is released.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type LockMap = DashMap<String, Arc<RwLock<()>>>;

#[derive(Clone, Default)]
pub struct ObjectLocks {
    locks: Arc<LockMap>,
}

enum Held {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

/// Held lock on one object name; released on drop
pub struct ObjectGuard {
    locks: Arc<LockMap>,
    name: String,
    held: Option<Held>,
}

impl Drop for ObjectGuard {
    fn drop(&mut self) {
        // Release first so the table entry is the only remaining reference
        self.held.take();
        self.locks
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl ObjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, name: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .value()
            .clone()
    }

    /// Shared access: concurrent with other readers of `name`
    pub async fn read(&self, name: &str) -> ObjectGuard {
        let guard = self.lock_for(name).read_owned().await;
        ObjectGuard {
            locks: self.locks.clone(),
            name: name.to_string(),
            held: Some(Held::Shared(guard)),
        }
    }

    /// Exclusive access: no other reader or writer of `name`
    pub async fn write(&self, name: &str) -> ObjectGuard {
        let guard = self.lock_for(name).write_owned().await;
        ObjectGuard {
            locks: self.locks.clone(),
            name: name.to_string(),
            held: Some(Held::Exclusive(guard)),
        }
    }

    /// Number of names with a live lock entry
    #[cfg(test)]
    fn active(&self) -> usize {
        self.locks.len()
    }
}
