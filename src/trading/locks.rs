//! In-memory per-order locks
//!
//! Acquisition is one critical section (check and insert together). The
//! returned guard releases the order on drop, so every exit path of the
//! holder, including a panic, frees it. Nothing is persisted: a restart
//! starts with an empty set.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone, Default)]
pub struct OrderLocks {
    held: Arc<Mutex<HashSet<i64>>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self) -> MutexGuard<'_, HashSet<i64>> {
        // The set is always left consistent, so a poisoned lock is still usable
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `id`, or `None` if someone already holds it
    pub fn try_acquire(&self, id: i64) -> Option<OrderLockGuard> {
        if self.set().insert(id) {
            Some(OrderLockGuard {
                locks: self.clone(),
                id,
            })
        } else {
            None
        }
    }

    pub fn is_locked(&self, id: i64) -> bool {
        self.set().contains(&id)
    }

    pub fn held(&self) -> usize {
        self.set().len()
    }
}

pub struct OrderLockGuard {
    locks: OrderLocks,
    id: i64,
}

impl Drop for OrderLockGuard {
    fn drop(&mut self) {
        self.locks.set().remove(&self.id);
    }
}
