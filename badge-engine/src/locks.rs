//! Per-(user, badge) serialization.
//!
//! Dispatch, backfill and reset of the same row take the same async mutex,
//! so interleaved read-modify-write cycles cannot lose updates. Keys are
//! always locked in sorted order to avoid deadlocks between events that
//! touch overlapping sets of rows.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use badge_core::ProgressKey;

/// Guards held for a set of keys; released on drop.
pub struct KeyGuards {
    guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyGuards {
    /// Guards that lock nothing, for when serialization is disabled.
    pub fn none() -> Self {
        Self {
            guards: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

/// Registry of per-key async mutexes.
#[derive(Default)]
pub struct KeyLocks {
    locks: DashMap<ProgressKey, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, key: &ProgressKey) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(key.clone()).or_default().value())
    }

    /// Lock a single key.
    pub async fn lock(&self, key: &ProgressKey) -> KeyGuards {
        let guard = self.mutex_for(key).lock_owned().await;
        KeyGuards {
            guards: vec![guard],
        }
    }

    /// Lock every key, in sorted order.
    pub async fn lock_all<'a>(&self, keys: impl IntoIterator<Item = &'a ProgressKey>) -> KeyGuards {
        let ordered: BTreeSet<&ProgressKey> = keys.into_iter().collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            guards.push(self.mutex_for(key).lock_owned().await);
        }
        KeyGuards { guards }
    }

    /// Drop mutexes nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, m| Arc::strong_count(m) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
