//! Badge observers - one unit of badge-specific logic per badge.
//!
//! Every observer implements [`BadgeObserver`]. The dispatcher supplies the
//! current progress row; the observer decides whether the event changes
//! anything and returns the updated row plus an optional grant. Returning
//! `None` means "no observable change": nothing is saved, nothing granted.
//!
//! Families:
//! - **Milestone**: one qualifying event completes the badge
//! - **Keyed counter**: unique occurrences counted against tiers
//! - **Rate window**: counted usages throttled per session
//! - **Composite**: two independent conditions, any order
//! - **Aggregate rarity**: a bundle checked against an external lookup
//! - **Time spent**: areas counted after a minimum stay

mod composite;
mod counter;
mod milestone;
mod rarity;
mod rate;
mod travel;

pub use composite::OpenForBusinessObserver;
pub(crate) use composite::{ITEM_PUBLISHED, STORE_COMPLETED};
pub use counter::{
    AttendedEvents, FriendConnections, KeyedCounterObserver, Occurrence, OccurrenceSource,
    PublishedItems, WearablePurchases,
};
pub use milestone::{CitizenObserver, LandArchitectObserver};
pub use rarity::LegendaryLookObserver;
pub use rate::EmotionistaObserver;
pub use travel::TravelerObserver;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use badge_core::tiers;
use badge_core::{
    validate_address, BadgeCatalog, BadgeDefinition, BadgeGrant, BadgeId, CatalogError,
    DomainEvent, EventKey, UserProgress,
};

use crate::cache::EphemeralCache;
use crate::config::ObserverConfig;
use crate::error::ObserverError;
use crate::lookup::ItemLookup;

/// Badge-specific reaction to domain events.
#[async_trait]
pub trait BadgeObserver: Send + Sync {
    /// Badge this observer progresses.
    fn badge_id(&self) -> BadgeId;

    /// Event keys this observer reacts to.
    fn events(&self) -> &[EventKey];

    /// Normalized address of the user the event is about, if any.
    fn user_address(&self, event: &DomainEvent) -> Option<String>;

    /// React to an event given the user's current row.
    async fn handle(
        &self,
        event: &DomainEvent,
        current: Option<&UserProgress>,
    ) -> Result<Option<ObserverOutcome>, ObserverError>;
}

/// Observable change produced by an observer.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverOutcome {
    /// Row to persist
    pub updated: UserProgress,
    /// Grant to announce, if a tier or the badge was reached
    pub granted: Option<BadgeGrant>,
}

/// Kind of a marketplace item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemCategory {
    Wearable,
    Emote,
}

/// Metadata of `Blockchain/ItemPublished`, shared by several badges.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ItemPublishedMetadata {
    pub creator: String,
    pub item_id: String,
    pub category: ItemCategory,
}

/// Apply the live tier rule and build the outcome.
pub(crate) fn finish(
    definition: &BadgeDefinition,
    mut progress: UserProgress,
    at: DateTime<Utc>,
) -> ObserverOutcome {
    let evaluation = tiers::apply_live(definition, &mut progress, at);
    progress.updated_at = Utc::now();
    let granted = evaluation.grant(definition, &progress.user_address);
    if let Some(grant) = &granted {
        debug!(
            badge_id = %definition.id,
            user = %progress.user_address,
            tiers = ?grant.tier_ids(),
            "Badge progress granted"
        );
    }
    ObserverOutcome {
        updated: progress,
        granted,
    }
}

/// Complete a single-milestone badge at `at`, unless already complete.
pub(crate) fn complete_milestone(
    definition: &BadgeDefinition,
    current: Option<&UserProgress>,
    user_address: &str,
    at: DateTime<Utc>,
) -> Option<ObserverOutcome> {
    let mut progress = UserProgress::or_new(current, definition.id, user_address);
    if progress.is_completed() {
        return None;
    }
    progress.progress.steps = progress.progress.steps.max(definition.criteria.steps);
    Some(finish(definition, progress, at))
}

/// Decode a subject address out of event metadata, logging failures.
pub(crate) fn subject_from<T, F>(badge_id: BadgeId, event: &DomainEvent, pick: F) -> Option<String>
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(&T) -> Option<&str>,
{
    let metadata = match event.metadata::<T>() {
        Ok(metadata) => metadata,
        Err(e) => {
            debug!(badge_id = %badge_id, event_id = %event.key, error = %e, "Undecodable metadata");
            return None;
        }
    };
    let raw = pick(&metadata)?;
    match validate_address(raw) {
        Ok(address) => Some(address),
        Err(e) => {
            debug!(badge_id = %badge_id, event_id = %event.key, error = %e, "Invalid subject address");
            None
        }
    }
}

/// Registry of observers keyed by badge id.
#[derive(Default, Clone)]
pub struct ObserverRegistry {
    observers: BTreeMap<BadgeId, Arc<dyn BadgeObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer, replacing any previous one for the badge.
    pub fn register(&mut self, observer: Arc<dyn BadgeObserver>) {
        self.observers.insert(observer.badge_id(), observer);
    }

    pub fn get(&self, badge_id: BadgeId) -> Option<Arc<dyn BadgeObserver>> {
        self.observers.get(&badge_id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn BadgeObserver>> {
        self.observers.values()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

/// Shared collaborators handed to observers at construction.
#[derive(Clone)]
pub struct ObserverDeps {
    pub catalog: Arc<BadgeCatalog>,
    pub cache: Arc<dyn EphemeralCache>,
    pub lookup: Arc<dyn ItemLookup>,
    pub config: ObserverConfig,
}

/// Build observers for every badge present in the catalog.
pub fn standard_observers(deps: &ObserverDeps) -> Result<ObserverRegistry, CatalogError> {
    let catalog = &deps.catalog;
    let mut registry = ObserverRegistry::new();

    for badge_id in BadgeId::ALL {
        if !catalog.contains(badge_id) {
            debug!(badge_id = %badge_id, "Badge not in catalog, no observer registered");
            continue;
        }
        let observer: Arc<dyn BadgeObserver> = match badge_id {
            BadgeId::DecentralandCitizen => Arc::new(CitizenObserver::new(catalog)?),
            BadgeId::LandArchitect => Arc::new(LandArchitectObserver::new(catalog)?),
            BadgeId::Traveler => Arc::new(TravelerObserver::new(
                catalog,
                Arc::clone(&deps.cache),
                deps.config.min_scene_stay(),
            )?),
            BadgeId::Emotionista => Arc::new(EmotionistaObserver::new(
                catalog,
                Arc::clone(&deps.cache),
                deps.config.emote_window(),
            )?),
            BadgeId::Fashionista => Arc::new(KeyedCounterObserver::new(
                catalog,
                badge_id,
                WearablePurchases,
            )?),
            BadgeId::WearableDesigner => Arc::new(KeyedCounterObserver::new(
                catalog,
                badge_id,
                PublishedItems::new(ItemCategory::Wearable),
            )?),
            BadgeId::EmoteCreator => Arc::new(KeyedCounterObserver::new(
                catalog,
                badge_id,
                PublishedItems::new(ItemCategory::Emote),
            )?),
            BadgeId::SocialButterfly => Arc::new(KeyedCounterObserver::new(
                catalog,
                badge_id,
                FriendConnections,
            )?),
            BadgeId::EventEnthusiast => Arc::new(KeyedCounterObserver::new(
                catalog,
                badge_id,
                AttendedEvents,
            )?),
            BadgeId::OpenForBusiness => Arc::new(OpenForBusinessObserver::new(catalog)?),
            BadgeId::LegendaryLook => Arc::new(LegendaryLookObserver::new(
                catalog,
                Arc::clone(&deps.lookup),
                deps.config.legendary_look_min_items,
            )?),
        };
        registry.register(observer);
    }

    Ok(registry)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use badge_core::EventKey;
    use chrono::TimeZone;

    pub const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    pub const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    pub fn event(key: EventKey, secs: i64, metadata: serde_json::Value) -> DomainEvent {
        DomainEvent::new(key, format!("evt-{}", secs), at(secs), metadata)
    }
}
