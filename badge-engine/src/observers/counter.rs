//! Counter-with-tiers badges, deduplicated by a natural identity key.
//!
//! A single generic observer handles every keyed family; what differs per
//! badge is where the subject and the identity come from, captured by an
//! [`OccurrenceSource`].

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use badge_core::{
    normalize_address, validate_address, BadgeCatalog, BadgeDefinition, BadgeId, CatalogError,
    DomainEvent, EventKey, EventSubType, EventType, EvidenceItem, UserProgress, ValidationError,
};

use super::{finish, BadgeObserver, ItemCategory, ItemPublishedMetadata, ObserverOutcome};
use crate::error::ObserverError;

/// Subject and identity extracted from one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub user_address: String,
    /// Natural identity; a repeat is never counted twice
    pub key: String,
}

/// Where a keyed badge finds its occurrences.
pub trait OccurrenceSource: Send + Sync + 'static {
    /// Event keys carrying occurrences.
    fn events(&self) -> &'static [EventKey];

    /// Extract the occurrence, or `None` when the event does not qualify.
    fn extract(&self, event: &DomainEvent) -> Result<Option<Occurrence>, ValidationError>;
}

const ITEM_SOLD: [EventKey; 1] = [EventKey::new(EventType::Blockchain, EventSubType::ItemSold)];
const ITEM_PUBLISHED: [EventKey; 1] =
    [EventKey::new(EventType::Blockchain, EventSubType::ItemPublished)];
const FRIENDSHIP_ACCEPTED: [EventKey; 1] =
    [EventKey::new(EventType::Social, EventSubType::FriendshipAccepted)];
const EVENT_ATTENDED: [EventKey; 1] = [EventKey::new(EventType::Client, EventSubType::EventAttended)];

fn require_non_empty(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::field(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSoldMetadata {
    buyer: String,
    transaction_hash: String,
    category: ItemCategory,
}

/// Wearables bought on the marketplace, keyed by transaction hash.
pub struct WearablePurchases;

impl OccurrenceSource for WearablePurchases {
    fn events(&self) -> &'static [EventKey] {
        &ITEM_SOLD
    }

    fn extract(&self, event: &DomainEvent) -> Result<Option<Occurrence>, ValidationError> {
        let metadata: ItemSoldMetadata = event.metadata()?;
        if metadata.category != ItemCategory::Wearable {
            return Ok(None);
        }
        Ok(Some(Occurrence {
            user_address: validate_address(&metadata.buyer)?,
            key: require_non_empty("transactionHash", &metadata.transaction_hash)?
                .to_ascii_lowercase(),
        }))
    }
}

/// Items published by a creator, keyed by item id.
pub struct PublishedItems {
    category: ItemCategory,
}

impl PublishedItems {
    pub fn new(category: ItemCategory) -> Self {
        Self { category }
    }
}

impl OccurrenceSource for PublishedItems {
    fn events(&self) -> &'static [EventKey] {
        &ITEM_PUBLISHED
    }

    fn extract(&self, event: &DomainEvent) -> Result<Option<Occurrence>, ValidationError> {
        let metadata: ItemPublishedMetadata = event.metadata()?;
        if metadata.category != self.category {
            return Ok(None);
        }
        Ok(Some(Occurrence {
            user_address: validate_address(&metadata.creator)?,
            key: require_non_empty("itemId", &metadata.item_id)?.to_ascii_lowercase(),
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FriendshipMetadata {
    user_address: String,
    friend_address: String,
}

/// Accepted friendships, keyed by the counterpart's address.
pub struct FriendConnections;

impl OccurrenceSource for FriendConnections {
    fn events(&self) -> &'static [EventKey] {
        &FRIENDSHIP_ACCEPTED
    }

    fn extract(&self, event: &DomainEvent) -> Result<Option<Occurrence>, ValidationError> {
        let metadata: FriendshipMetadata = event.metadata()?;
        let user = validate_address(&metadata.user_address)?;
        let friend = validate_address(&metadata.friend_address)?;
        if user == friend {
            return Ok(None);
        }
        Ok(Some(Occurrence {
            user_address: user,
            key: friend,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventAttendedMetadata {
    user_address: String,
    event_id: String,
}

/// Community events attended, keyed by event id.
pub struct AttendedEvents;

impl OccurrenceSource for AttendedEvents {
    fn events(&self) -> &'static [EventKey] {
        &EVENT_ATTENDED
    }

    fn extract(&self, event: &DomainEvent) -> Result<Option<Occurrence>, ValidationError> {
        let metadata: EventAttendedMetadata = event.metadata()?;
        Ok(Some(Occurrence {
            user_address: validate_address(&metadata.user_address)?,
            key: require_non_empty("eventId", &metadata.event_id)?,
        }))
    }
}

/// Observer counting unique occurrences against the badge's tiers.
pub struct KeyedCounterObserver<S> {
    definition: Arc<BadgeDefinition>,
    source: S,
}

impl<S: OccurrenceSource> KeyedCounterObserver<S> {
    pub fn new(catalog: &BadgeCatalog, badge_id: BadgeId, source: S) -> Result<Self, CatalogError> {
        Ok(Self {
            definition: catalog.definition(badge_id)?,
            source,
        })
    }
}

#[async_trait]
impl<S: OccurrenceSource> BadgeObserver for KeyedCounterObserver<S> {
    fn badge_id(&self) -> BadgeId {
        self.definition.id
    }

    fn events(&self) -> &[EventKey] {
        self.source.events()
    }

    fn user_address(&self, event: &DomainEvent) -> Option<String> {
        self.source
            .extract(event)
            .ok()
            .flatten()
            .map(|o| normalize_address(&o.user_address))
    }

    async fn handle(
        &self,
        event: &DomainEvent,
        current: Option<&UserProgress>,
    ) -> Result<Option<ObserverOutcome>, ObserverError> {
        let Some(occurrence) = self.source.extract(event)? else {
            return Ok(None);
        };

        let mut progress =
            UserProgress::or_new(current, self.definition.id, &occurrence.user_address);
        if progress.is_completed() || progress.progress.evidence.contains_key(&occurrence.key) {
            return Ok(None);
        }

        progress
            .progress
            .evidence
            .insert_item(EvidenceItem::new(occurrence.key, event.timestamp));
        let counted = progress.progress.evidence.items().len() as u32;
        progress.progress.steps = progress.progress.steps.max(counted);

        Ok(Some(finish(&self.definition, progress, Utc::now())))
    }
}
