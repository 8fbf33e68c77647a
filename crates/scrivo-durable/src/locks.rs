//! Per-key exclusive locks.
//!
//! Virtual objects and workflow instances admit one exclusive handler per
//! key at a time. Handlers for different keys never block each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::store::Scope;

type Slot = Arc<AsyncMutex<()>>;

/// Registry of one async mutex per [`Scope`].
///
/// Entries are created on demand and pruned when the last guard and the last
/// waiter go away.
#[derive(Debug, Default, Clone)]
pub struct KeyedLocks {
    slots: Arc<Mutex<HashMap<Scope, Slot>>>,
}

impl KeyedLocks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the lock for `scope` is free and takes it.
    pub async fn acquire(&self, scope: &Scope) -> KeyGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(scope.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        KeyGuard {
            scope: scope.clone(),
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        }
    }

    /// Number of keys with a live lock entry.
    pub fn active(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Holds the exclusive lock for one scope until dropped.
#[derive(Debug)]
pub struct KeyGuard {
    scope: Scope,
    slots: Arc<Mutex<HashMap<Scope, Slot>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    /// Scope this guard protects.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let slot = Arc::clone(OwnedMutexGuard::mutex(&guard));
        drop(guard);

        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map plus our local clone means nobody waits.
        if let Some(current) = slots.get(&self.scope)
            && Arc::ptr_eq(current, &slot)
            && Arc::strong_count(&slot) <= 2
        {
            slots.remove(&self.scope);
        }
    }
}
