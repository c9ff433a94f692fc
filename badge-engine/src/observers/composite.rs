//! Open for Business: a configured store and a published item, in any order.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use badge_core::{
    validate_address, BadgeCatalog, BadgeDefinition, BadgeId, CatalogError, DomainEvent,
    EventKey, EventSubType, EventType, UserProgress,
};

use super::{finish, subject_from, BadgeObserver, ItemPublishedMetadata, ObserverOutcome};
use crate::error::ObserverError;

pub(crate) const STORE_COMPLETED: &str = "store_completed";
pub(crate) const ITEM_PUBLISHED: &str = "item_published";

const STORE_SETTINGS: EventKey = EventKey::new(EventType::Catalyst, EventSubType::StoreSettingsDeployed);
const ITEM_PUBLISHED_EVENT: EventKey = EventKey::new(EventType::Blockchain, EventSubType::ItemPublished);
const EVENTS: [EventKey; 2] = [STORE_SETTINGS, ITEM_PUBLISHED_EVENT];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreSettingsMetadata {
    user_address: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    links: Vec<String>,
}

impl StoreSettingsMetadata {
    /// A store counts once it has a description and at least one link.
    fn is_complete(&self) -> bool {
        let described = self
            .description
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty());
        described && self.links.iter().any(|l| !l.trim().is_empty())
    }
}

pub struct OpenForBusinessObserver {
    definition: Arc<BadgeDefinition>,
}

impl OpenForBusinessObserver {
    pub fn new(catalog: &BadgeCatalog) -> Result<Self, CatalogError> {
        Ok(Self {
            definition: catalog.definition(BadgeId::OpenForBusiness)?,
        })
    }

    /// Subject and satisfied condition carried by the event, if any.
    fn condition(&self, event: &DomainEvent) -> Result<Option<(String, &'static str)>, ObserverError> {
        if event.event_key() == STORE_SETTINGS {
            let metadata: StoreSettingsMetadata = event.metadata()?;
            if !metadata.is_complete() {
                return Ok(None);
            }
            Ok(Some((validate_address(&metadata.user_address)?, STORE_COMPLETED)))
        } else {
            let metadata: ItemPublishedMetadata = event.metadata()?;
            Ok(Some((validate_address(&metadata.creator)?, ITEM_PUBLISHED)))
        }
    }
}

#[async_trait]
impl BadgeObserver for OpenForBusinessObserver {
    fn badge_id(&self) -> BadgeId {
        BadgeId::OpenForBusiness
    }

    fn events(&self) -> &[EventKey] {
        &EVENTS
    }

    fn user_address(&self, event: &DomainEvent) -> Option<String> {
        if event.event_key() == STORE_SETTINGS {
            subject_from(self.badge_id(), event, |m: &StoreSettingsMetadata| {
                Some(m.user_address.as_str())
            })
        } else {
            subject_from(self.badge_id(), event, |m: &ItemPublishedMetadata| {
                Some(m.creator.as_str())
            })
        }
    }

    async fn handle(
        &self,
        event: &DomainEvent,
        current: Option<&UserProgress>,
    ) -> Result<Option<ObserverOutcome>, ObserverError> {
        let Some((user, condition)) = self.condition(event)? else {
            return Ok(None);
        };

        let mut progress = UserProgress::or_new(current, BadgeId::OpenForBusiness, &user);
        if progress.is_completed()
            || !progress.progress.evidence.set_condition(condition, event.timestamp)
        {
            return Ok(None);
        }
        progress.progress.steps = progress.progress.evidence.condition_count() as u32;

        // Completion happens when the later of the two conditions was met.
        let at = [STORE_COMPLETED, ITEM_PUBLISHED]
            .iter()
            .filter_map(|c| progress.progress.evidence.condition(c))
            .max()
            .unwrap_or(event.timestamp);
        Ok(Some(finish(&self.definition, progress, at)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observers::test_support::{at, event, ALICE};
    use serde_json::json;

    fn observer() -> OpenForBusinessObserver {
        OpenForBusinessObserver::new(&BadgeCatalog::standard()).unwrap()
    }

    fn store(secs: i64, description: &str) -> DomainEvent {
        event(
            STORE_SETTINGS,
            secs,
            json!({ "userAddress": ALICE, "description": description, "links": ["https://shop"] }),
        )
    }

    fn published(secs: i64) -> DomainEvent {
        event(
            ITEM_PUBLISHED_EVENT,
            secs,
            json!({ "creator": ALICE, "itemId": "urn:1", "category": "wearable" }),
        )
    }

    #[tokio::test]
    async fn test_either_order_completes() {
        let observer = observer();

        let first = observer.handle(&published(10), None).await.unwrap().unwrap();
        assert_eq!(first.updated.progress.steps, 1);
        assert!(first.granted.is_none());

        let second = observer
            .handle(&store(20, "Best hats"), Some(&first.updated))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.updated.progress.steps, 2);
        assert_eq!(second.updated.completed_at, Some(at(20)));
        assert_eq!(second.granted.unwrap().badge_granted.id, BadgeId::OpenForBusiness);

        let reversed = observer.handle(&store(5, "Shop"), None).await.unwrap().unwrap();
        let done = observer
            .handle(&published(6), Some(&reversed.updated))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.updated.completed_at, Some(at(6)));
    }

    #[tokio::test]
    async fn test_repeated_condition_is_noop() {
        let observer = observer();
        let first = observer.handle(&published(10), None).await.unwrap().unwrap();
        assert!(observer
            .handle(&published(11), Some(&first.updated))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_incomplete_store_ignored() {
        let observer = observer();
        assert!(observer.handle(&store(1, "  "), None).await.unwrap().is_none());
        let no_links = event(
            STORE_SETTINGS,
            1,
            json!({ "userAddress": ALICE, "description": "Hats" }),
        );
        assert!(observer.handle(&no_links, None).await.unwrap().is_none());
        assert_eq!(observer.user_address(&no_links).as_deref(), Some(ALICE));
    }
}
