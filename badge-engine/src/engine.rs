//! BadgeEngine - the facade tying catalog, observers, dispatcher and
//! backfill together.
//!
//! Callers feed events through [`BadgeEngine::process_event`] and historical
//! data through [`BadgeEngine::backfill`]. Both paths, plus
//! [`BadgeEngine::reset_progress`], serialize on the same per-(user, badge)
//! locks.

use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use badge_core::{
    validate_address, AchievedTier, BadgeCatalog, BadgeCategory, BadgeDefinition, BadgeGrant,
    BadgeId, DomainEvent, ProgressKey, UserProgress,
};

use crate::backfill::BackfillMerger;
use crate::cache::EphemeralCache;
use crate::config::EngineConfig;
use crate::dispatcher::{DispatchStatsSnapshot, EventDispatcher};
use crate::error::{BackfillError, Result};
use crate::locks::{KeyGuards, KeyLocks};
use crate::lookup::ItemLookup;
use crate::observers::{standard_observers, ObserverDeps, ObserverRegistry};
use crate::store::ProgressStore;

/// The badge progression engine.
pub struct BadgeEngine {
    /// Configuration
    config: EngineConfig,
    /// Badge definitions
    catalog: Arc<BadgeCatalog>,
    /// Progress persistence
    store: Arc<dyn ProgressStore>,
    /// Per-(user, badge) locks, absent when serialization is disabled
    locks: Option<Arc<KeyLocks>>,
    /// Registered observers
    observers: ObserverRegistry,
    /// Event routing
    dispatcher: EventDispatcher,
    /// Historical data merger
    merger: BackfillMerger,
}

impl BadgeEngine {
    /// Build an engine with an observer for every badge in the catalog.
    pub fn new(
        config: EngineConfig,
        catalog: Arc<BadgeCatalog>,
        store: Arc<dyn ProgressStore>,
        cache: Arc<dyn EphemeralCache>,
        lookup: Arc<dyn ItemLookup>,
    ) -> Result<Self> {
        let observers = standard_observers(&ObserverDeps {
            catalog: Arc::clone(&catalog),
            cache,
            lookup,
            config: config.observers.clone(),
        })?;

        let locks = config
            .dispatch
            .serialize_per_key
            .then(|| Arc::new(KeyLocks::new()));

        let mut builder = EventDispatcher::builder(Arc::clone(&store));
        if let Some(locks) = &locks {
            builder = builder.with_locks(Arc::clone(locks));
        }
        let dispatcher = builder.register_all(&observers).build();

        info!(
            badges = catalog.len(),
            observers = observers.len(),
            serialize_per_key = locks.is_some(),
            "BadgeEngine initialized"
        );

        Ok(Self {
            merger: BackfillMerger::new(Arc::clone(&catalog)),
            config,
            catalog,
            store,
            locks,
            observers,
            dispatcher,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<BadgeCatalog> {
        &self.catalog
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Dispatcher counters.
    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.dispatcher.stats()
    }

    /// Process one event and return the grants it produced.
    ///
    /// `None` means no observer handles the event, or the dispatch was
    /// aborted by a shared failure; either way the event counts as handled.
    pub async fn process_event(&self, event: &DomainEvent) -> Option<Vec<BadgeGrant>> {
        match self.dispatcher.dispatch(event).await {
            Ok(grants) => {
                if let Some(grants) = grants.as_ref().filter(|g| !g.is_empty()) {
                    debug!(event_id = %event.key, grants = grants.len(), "Event produced grants");
                }
                grants
            }
            Err(e) => {
                error!(
                    event_id = %event.key,
                    event = %event.event_key(),
                    error = %e,
                    "Dispatch aborted, event acknowledged without processing"
                );
                None
            }
        }
    }

    async fn lock(&self, key: &ProgressKey) -> KeyGuards {
        match &self.locks {
            Some(locks) => locks.lock(key).await,
            None => KeyGuards::none(),
        }
    }

    fn release(&self, guards: KeyGuards) {
        drop(guards);
        if let Some(locks) = &self.locks {
            locks.prune();
        }
    }

    /// Merge historical data for one user and badge, then persist it.
    ///
    /// Safe to retry: an identical payload leaves the row unchanged and
    /// skips the save.
    pub async fn backfill(
        &self,
        badge_id: &str,
        user_address: &str,
        payload: &serde_json::Value,
    ) -> Result<UserProgress> {
        let badge_id = BadgeId::from_str(badge_id).map_err(BackfillError::from)?;
        let definition = self.catalog.definition(badge_id).map_err(BackfillError::from)?;
        let user = validate_address(user_address)?;
        let key = ProgressKey::new(badge_id, &user);

        let guards = self.lock(&key).await;
        let result = self.backfill_locked(&definition, &user, payload).await;
        self.release(guards);

        match &result {
            Ok(row) => info!(
                badge_id = %badge_id,
                user = %user,
                steps = row.progress.steps,
                completed = row.is_completed(),
                "Backfill applied"
            ),
            Err(e) => warn!(badge_id = %badge_id, user = %user, error = %e, "Backfill rejected"),
        }
        result
    }

    async fn backfill_locked(
        &self,
        definition: &BadgeDefinition,
        user: &str,
        payload: &serde_json::Value,
    ) -> Result<UserProgress> {
        let current = self.store.get_one(definition.id, user).await?;
        let merged = self
            .merger
            .merge_user_progress(definition.id, user, current.as_ref(), payload)?;
        merged
            .validate(definition)
            .map_err(BackfillError::InvalidProgress)?;
        if current.as_ref() != Some(&merged) {
            self.store.save(&merged).await?;
        }
        Ok(merged)
    }

    /// Delete a user's progress for a badge.
    pub async fn reset_progress(&self, badge_id: BadgeId, user_address: &str) -> Result<()> {
        let user = validate_address(user_address)?;
        let key = ProgressKey::new(badge_id, &user);

        let guards = self.lock(&key).await;
        let result = self.store.delete(badge_id, &user).await;
        self.release(guards);

        result?;
        info!(badge_id = %badge_id, user = %user, "Progress reset");
        Ok(())
    }

    /// Summarize every badge a user has progress on.
    pub async fn user_badges(&self, user_address: &str) -> Result<UserBadges> {
        let user = validate_address(user_address)?;
        let rows = self.store.get_all_for_user(&user).await?;

        let mut summary = UserBadges {
            user_address: user,
            achieved: Vec::new(),
            in_progress: Vec::new(),
        };
        for row in rows {
            let Some(definition) = self.catalog.get(row.badge_id) else {
                warn!(badge_id = %row.badge_id, "Progress row for badge missing from catalog");
                continue;
            };
            let next_tier = definition
                .tiers()
                .iter()
                .find(|t| !row.has_tier(&t.tier_id))
                .map(|t| NextTier {
                    tier_id: t.tier_id.clone(),
                    tier_name: t.tier_name.clone(),
                    steps_required: t.criteria.steps,
                    steps_remaining: t.criteria.steps.saturating_sub(row.progress.steps),
                });
            let badge = BadgeSummary {
                badge_id: row.badge_id,
                name: definition.name.clone(),
                category: definition.category,
                steps: row.progress.steps,
                required_steps: definition.criteria.steps,
                achieved_tiers: row.achieved_tiers,
                completed_at: row.completed_at,
                next_tier,
            };
            if badge.completed_at.is_some() {
                summary.achieved.push(badge);
            } else {
                summary.in_progress.push(badge);
            }
        }
        Ok(summary)
    }
}

/// A user's badges, split by completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBadges {
    pub user_address: String,
    pub achieved: Vec<BadgeSummary>,
    pub in_progress: Vec<BadgeSummary>,
}

/// Progress on one badge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeSummary {
    pub badge_id: BadgeId,
    pub name: String,
    pub category: BadgeCategory,
    pub steps: u32,
    /// Steps needed to complete the whole badge
    pub required_steps: u32,
    pub achieved_tiers: Vec<AchievedTier>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Lowest tier not yet achieved
    pub next_tier: Option<NextTier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextTier {
    pub tier_id: String,
    pub tier_name: String,
    pub steps_required: u32,
    pub steps_remaining: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::error::EngineError;
    use crate::lookup::StaticItemLookup;
    use crate::observers::test_support::{at, event, ALICE};
    use crate::store::InMemoryProgressStore;
    use badge_core::{EventKey, EventSubType, EventType};
    use serde_json::json;

    fn engine(store: Arc<InMemoryProgressStore>) -> BadgeEngine {
        BadgeEngine::new(
            EngineConfig::default(),
            Arc::new(BadgeCatalog::standard()),
            store,
            Arc::new(InMemoryCache::default()),
            Arc::new(StaticItemLookup::default()),
        )
        .unwrap()
    }

    fn purchase(secs: i64, tx: &str) -> DomainEvent {
        event(
            EventKey::new(EventType::Blockchain, EventSubType::ItemSold),
            secs,
            json!({ "buyer": ALICE, "transactionHash": tx, "category": "wearable" }),
        )
    }

    #[tokio::test]
    async fn test_fetch_failure_acknowledged() {
        let store = Arc::new(InMemoryProgressStore::new());
        let engine = engine(store.clone());
        store.set_available(false);

        assert!(engine.process_event(&purchase(1, "0x1")).await.is_none());
        assert_eq!(engine.stats().fetch_failures, 1);
    }

    #[tokio::test]
    async fn test_backfill_then_live_event() {
        let store = Arc::new(InMemoryProgressStore::new());
        let engine = engine(store.clone());

        let payload = json!({ "purchases": [
            { "transactionHash": "0x1", "purchasedAt": at(1).timestamp_millis() },
        ]});
        let row = engine.backfill("fashionista", ALICE, &payload).await.unwrap();
        assert_eq!(row.achieved_tiers[0].completed_at, at(1));
        assert_eq!(store.save_count(), 1);

        engine.backfill("fashionista", ALICE, &payload).await.unwrap();
        assert_eq!(store.save_count(), 1);

        let grants = engine.process_event(&purchase(5, "0x1")).await.unwrap();
        assert!(grants.is_empty());
        let grants = engine.process_event(&purchase(6, "0x2")).await.unwrap();
        assert!(grants.is_empty());
        assert_eq!(
            store.get_one(BadgeId::Fashionista, ALICE).await.unwrap().unwrap().steps(),
            2
        );
    }

    #[tokio::test]
    async fn test_backfill_rejects_unknown_badge() {
        let engine = engine(Arc::new(InMemoryProgressStore::new()));
        let result = engine.backfill("astronaut", ALICE, &json!({})).await;
        assert!(matches!(
            result,
            Err(EngineError::Backfill(BackfillError::UnknownBadge(_)))
        ));
    }

    #[tokio::test]
    async fn test_reset_and_summary() {
        let store = Arc::new(InMemoryProgressStore::new());
        let engine = engine(store.clone());
        engine
            .backfill("decentraland-citizen", ALICE, &json!({ "firstSeenAt": at(1).timestamp_millis() }))
            .await
            .unwrap();
        engine.process_event(&purchase(2, "0x1")).await;

        let badges = engine.user_badges(ALICE).await.unwrap();
        assert_eq!(badges.achieved.len(), 1);
        assert_eq!(badges.achieved[0].badge_id, BadgeId::DecentralandCitizen);
        assert_eq!(badges.in_progress.len(), 1);
        let next = badges.in_progress[0].next_tier.as_ref().unwrap();
        assert_eq!(next.tier_id, "fashionista-bronze");
        assert_eq!(next.steps_remaining, 9);

        engine
            .reset_progress(BadgeId::DecentralandCitizen, ALICE)
            .await
            .unwrap();
        let badges = engine.user_badges(ALICE).await.unwrap();
        assert!(badges.achieved.is_empty());
    }
}
