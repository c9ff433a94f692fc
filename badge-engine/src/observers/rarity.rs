//! Legendary Look: a profile wearing enough legendary-or-rarer items at once.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use badge_core::{
    validate_address, BadgeCatalog, BadgeDefinition, BadgeId, CatalogError, DomainEvent,
    EventKey, EventSubType, EventType, UserProgress,
};

use super::{complete_milestone, subject_from, BadgeObserver, ObserverOutcome};
use crate::error::ObserverError;
use crate::lookup::{ItemLookup, Rarity};

const PROFILE_DEPLOYED: [EventKey; 1] =
    [EventKey::new(EventType::Catalyst, EventSubType::ProfileDeployed)];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileMetadata {
    user_address: String,
    #[serde(default)]
    equipped_items: Vec<String>,
}

pub struct LegendaryLookObserver {
    definition: Arc<BadgeDefinition>,
    lookup: Arc<dyn ItemLookup>,
    min_items: usize,
}

impl LegendaryLookObserver {
    pub fn new(
        catalog: &BadgeCatalog,
        lookup: Arc<dyn ItemLookup>,
        min_items: usize,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            definition: catalog.definition(BadgeId::LegendaryLook)?,
            lookup,
            min_items: min_items.max(1),
        })
    }
}

#[async_trait]
impl BadgeObserver for LegendaryLookObserver {
    fn badge_id(&self) -> BadgeId {
        BadgeId::LegendaryLook
    }

    fn events(&self) -> &[EventKey] {
        &PROFILE_DEPLOYED
    }

    fn user_address(&self, event: &DomainEvent) -> Option<String> {
        subject_from(self.badge_id(), event, |m: &ProfileMetadata| {
            Some(m.user_address.as_str())
        })
    }

    async fn handle(
        &self,
        event: &DomainEvent,
        current: Option<&UserProgress>,
    ) -> Result<Option<ObserverOutcome>, ObserverError> {
        let metadata: ProfileMetadata = event.metadata()?;
        let user = validate_address(&metadata.user_address)?;
        if current.is_some_and(UserProgress::is_completed) {
            return Ok(None);
        }

        let urns: Vec<String> = metadata
            .equipped_items
            .iter()
            .map(|u| u.trim().to_ascii_lowercase())
            .filter(|u| !u.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if urns.len() < self.min_items {
            return Ok(None);
        }

        let items = self.lookup.resolve_bundle(&urns).await?;
        let rare = items
            .iter()
            .filter(|i| i.rarity.is_some_and(|r| r >= Rarity::Legendary))
            .count();
        debug!(user = %user, equipped = urns.len(), rare, "Resolved equipped bundle");
        if rare < self.min_items {
            return Ok(None);
        }

        Ok(complete_milestone(
            &self.definition,
            current,
            &user,
            event.timestamp,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::StaticItemLookup;
    use crate::observers::test_support::{at, event, ALICE};
    use serde_json::json;

    fn lookup() -> Arc<StaticItemLookup> {
        Arc::new(StaticItemLookup::new([
            ("urn:legendary".to_string(), Rarity::Legendary),
            ("urn:mythic".to_string(), Rarity::Mythic),
            ("urn:unique".to_string(), Rarity::Unique),
            ("urn:epic".to_string(), Rarity::Epic),
        ]))
    }

    fn profile(secs: i64, items: &[&str]) -> DomainEvent {
        event(
            PROFILE_DEPLOYED[0],
            secs,
            json!({ "userAddress": ALICE, "equippedItems": items }),
        )
    }

    #[tokio::test]
    async fn test_three_rare_items_complete() {
        let lookup = lookup();
        let observer =
            LegendaryLookObserver::new(&BadgeCatalog::standard(), lookup.clone(), 3).unwrap();

        let outcome = observer
            .handle(
                &profile(7, &["urn:legendary", "urn:mythic", "urn:unique", "urn:base"]),
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.updated.completed_at, Some(at(7)));
        assert!(outcome.granted.is_some());
        assert_eq!(lookup.call_count(), 1);
    }

    #[tokio::test]
    async fn test_epic_does_not_count() {
        let observer = LegendaryLookObserver::new(&BadgeCatalog::standard(), lookup(), 3).unwrap();
        let outcome = observer
            .handle(&profile(1, &["urn:legendary", "urn:mythic", "urn:epic"]), None)
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_small_bundle_skips_lookup() {
        let lookup = lookup();
        let observer =
            LegendaryLookObserver::new(&BadgeCatalog::standard(), lookup.clone(), 3).unwrap();
        let outcome = observer
            .handle(&profile(1, &["urn:mythic", "URN:MYTHIC", "urn:unique"]), None)
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(lookup.call_count(), 0);
    }

    #[tokio::test]
    async fn test_lookup_failure_surfaces() {
        let observer = LegendaryLookObserver::new(
            &BadgeCatalog::standard(),
            Arc::new(StaticItemLookup::default().with_available(false)),
            3,
        )
        .unwrap();
        let result = observer
            .handle(&profile(1, &["urn:a", "urn:b", "urn:c"]), None)
            .await;
        assert!(matches!(result, Err(ObserverError::Lookup(_))));
    }
}
