//! Event dispatcher.
//!
//! Routes each event to the observers registered for its (type, subtype),
//! fetches every relevant progress row in one batched read, runs the
//! observers concurrently and persists each changed row exactly once.
//!
//! ```text
//! DomainEvent ─► index[(type, subtype)] ─► subjects ─► lock keys
//!                                                          │
//!          grants ◄─ save ◄─ join_all(handle) ◄─ get_many ◄┘
//! ```

use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use badge_core::{BadgeGrant, BadgeId, DomainEvent, EventKey, ProgressKey, UserProgress};

use crate::error::{DispatchError, ObserverError};
use crate::locks::{KeyGuards, KeyLocks};
use crate::observers::{BadgeObserver, ObserverRegistry};
use crate::store::ProgressStore;

/// Dispatcher counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    events: AtomicU64,
    routed: AtomicU64,
    observer_failures: AtomicU64,
    fetch_failures: AtomicU64,
    grants: AtomicU64,
    saves: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStatsSnapshot {
    /// Events handed to the dispatcher
    pub events: u64,
    /// Events with at least one registered observer
    pub routed: u64,
    /// Observer errors, including failed saves
    pub observer_failures: u64,
    /// Batched progress reads that failed
    pub fetch_failures: u64,
    /// Grants returned
    pub grants: u64,
    /// Rows persisted
    pub saves: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            routed: self.routed.load(Ordering::Relaxed),
            observer_failures: self.observer_failures.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            grants: self.grants.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Collects observers before the routing index is frozen.
pub struct DispatcherBuilder {
    store: Arc<dyn ProgressStore>,
    locks: Option<Arc<KeyLocks>>,
    index: HashMap<EventKey, Vec<Arc<dyn BadgeObserver>>>,
}

impl DispatcherBuilder {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self {
            store,
            locks: None,
            index: HashMap::new(),
        }
    }

    /// Serialize updates per (user, badge) through these locks.
    pub fn with_locks(mut self, locks: Arc<KeyLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Index an observer under every event key it declares.
    pub fn register_observer(&mut self, observer: Arc<dyn BadgeObserver>) -> &mut Self {
        for key in observer.events() {
            let observers = self.index.entry(*key).or_default();
            observers.retain(|o| o.badge_id() != observer.badge_id());
            observers.push(Arc::clone(&observer));
        }
        debug!(badge_id = %observer.badge_id(), events = observer.events().len(), "Registered observer");
        self
    }

    /// Register every observer of a registry.
    pub fn register_all(mut self, registry: &ObserverRegistry) -> Self {
        for observer in registry.iter() {
            self.register_observer(Arc::clone(observer));
        }
        self
    }

    pub fn build(self) -> EventDispatcher {
        EventDispatcher {
            store: self.store,
            locks: self.locks,
            index: self.index,
            stats: DispatchStats::default(),
        }
    }
}

/// Routes events to observers and persists their outcomes.
pub struct EventDispatcher {
    store: Arc<dyn ProgressStore>,
    locks: Option<Arc<KeyLocks>>,
    index: HashMap<EventKey, Vec<Arc<dyn BadgeObserver>>>,
    stats: DispatchStats,
}

struct Candidate {
    observer: Arc<dyn BadgeObserver>,
    key: ProgressKey,
}

impl EventDispatcher {
    pub fn builder(store: Arc<dyn ProgressStore>) -> DispatcherBuilder {
        DispatcherBuilder::new(store)
    }

    /// Observers registered for an event key.
    pub fn observers_for(&self, key: &EventKey) -> &[Arc<dyn BadgeObserver>] {
        self.index.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Dispatch one event.
    ///
    /// Returns `Ok(None)` when nothing listens to the event's key, otherwise
    /// the grants produced (possibly empty). Observer failures are logged and
    /// isolated; only a failed batched read aborts the dispatch.
    pub async fn dispatch(
        &self,
        event: &DomainEvent,
    ) -> Result<Option<Vec<BadgeGrant>>, DispatchError> {
        DispatchStats::bump(&self.stats.events, 1);
        let event_key = event.event_key();
        let observers = self.observers_for(&event_key);
        if observers.is_empty() {
            return Ok(None);
        }
        DispatchStats::bump(&self.stats.routed, 1);

        let candidates: Vec<Candidate> = observers
            .iter()
            .filter_map(|observer| {
                let user = observer.user_address(event);
                if user.is_none() {
                    debug!(badge_id = %observer.badge_id(), event_id = %event.key, "Observer declined event");
                }
                user.map(|u| Candidate {
                    observer: Arc::clone(observer),
                    key: ProgressKey::new(observer.badge_id(), &u),
                })
            })
            .collect();
        if candidates.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let guards = match &self.locks {
            Some(locks) => locks.lock_all(candidates.iter().map(|c| &c.key)).await,
            None => KeyGuards::none(),
        };

        let result = self.run(event, candidates).await;

        drop(guards);
        if let Some(locks) = &self.locks {
            locks.prune();
        }
        result.map(Some)
    }

    async fn run(
        &self,
        event: &DomainEvent,
        candidates: Vec<Candidate>,
    ) -> Result<Vec<BadgeGrant>, DispatchError> {
        let badge_ids: Vec<BadgeId> = candidates
            .iter()
            .map(|c| c.key.badge_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let users: Vec<String> = candidates
            .iter()
            .map(|c| c.key.user_address.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let rows: HashMap<ProgressKey, UserProgress> =
            match self.store.get_many(&badge_ids, &users).await {
                Ok(rows) => rows.into_iter().map(|r| (r.key(), r)).collect(),
                Err(e) => {
                    DispatchStats::bump(&self.stats.fetch_failures, 1);
                    warn!(event_id = %event.key, event = %event.event_key(), error = %e, "Progress fetch failed, event dropped");
                    return Err(DispatchError::ProgressFetch(e));
                }
            };

        let runnable: Vec<(Candidate, Option<&UserProgress>)> = candidates
            .into_iter()
            .filter_map(|c| {
                let current = rows.get(&c.key);
                if current.is_some_and(UserProgress::is_completed) {
                    debug!(badge_id = %c.key.badge_id, user = %c.key.user_address, "Badge already completed, skipped");
                    return None;
                }
                Some((c, current))
            })
            .collect();

        let results = join_all(
            runnable
                .iter()
                .map(|(candidate, current)| self.run_one(event, candidate, *current)),
        )
        .await;

        let mut grants = Vec::new();
        for ((candidate, _), result) in runnable.iter().zip(results) {
            match result {
                Ok(Some(grant)) => grants.push(grant),
                Ok(None) => {}
                Err(e) => {
                    DispatchStats::bump(&self.stats.observer_failures, 1);
                    warn!(
                        badge_id = %candidate.key.badge_id,
                        user = %candidate.key.user_address,
                        event_id = %event.key,
                        error = %e,
                        "Observer failed"
                    );
                }
            }
        }
        DispatchStats::bump(&self.stats.grants, grants.len() as u64);
        Ok(grants)
    }

    async fn run_one(
        &self,
        event: &DomainEvent,
        candidate: &Candidate,
        current: Option<&UserProgress>,
    ) -> Result<Option<BadgeGrant>, ObserverError> {
        let Some(outcome) = candidate.observer.handle(event, current).await? else {
            return Ok(None);
        };
        self.store.save(&outcome.updated).await?;
        DispatchStats::bump(&self.stats.saves, 1);
        Ok(outcome.granted)
    }
}
