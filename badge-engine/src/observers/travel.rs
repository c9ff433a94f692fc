//! Traveler: distinct scenes where the user stayed long enough.
//!
//! The scene a session is currently in lives in the ephemeral cache. When
//! the session moves to a different scene, the previous one counts if the
//! stay reached the minimum and it was not visited before.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use badge_core::{
    validate_address, BadgeCatalog, BadgeDefinition, BadgeId, CatalogError, DomainEvent,
    EventKey, EventSubType, EventType, EvidenceItem, UserProgress,
};

use super::{finish, subject_from, BadgeObserver, ObserverOutcome};
use crate::cache::EphemeralCache;
use crate::error::ObserverError;

const MOVE_TO_PARCEL: [EventKey; 1] = [EventKey::new(EventType::Client, EventSubType::MoveToParcel)];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveMetadata {
    user_address: String,
    session_id: String,
    #[serde(default)]
    scene_title: Option<String>,
}

/// Scene a session is currently standing in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneVisit {
    scene_title: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    entered_at: DateTime<Utc>,
}

pub struct TravelerObserver {
    definition: Arc<BadgeDefinition>,
    cache: Arc<dyn EphemeralCache>,
    min_stay: Duration,
}

impl TravelerObserver {
    pub fn new(
        catalog: &BadgeCatalog,
        cache: Arc<dyn EphemeralCache>,
        min_stay: Duration,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            definition: catalog.definition(BadgeId::Traveler)?,
            cache,
            min_stay,
        })
    }

    fn cache_key(user: &str, session_id: &str) -> String {
        format!("traveler:{}:{}", user, session_id)
    }

    async fn current_visit(&self, key: &str) -> Option<SceneVisit> {
        match self.cache.get(key).await {
            Ok(value) => value.and_then(|v| serde_json::from_value(v).ok()),
            Err(e) => {
                warn!(key = %key, error = %e, "Scene visit unreadable");
                None
            }
        }
    }
}

fn scene_title(raw: Option<String>) -> Option<String> {
    raw.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

#[async_trait]
impl BadgeObserver for TravelerObserver {
    fn badge_id(&self) -> BadgeId {
        BadgeId::Traveler
    }

    fn events(&self) -> &[EventKey] {
        &MOVE_TO_PARCEL
    }

    fn user_address(&self, event: &DomainEvent) -> Option<String> {
        subject_from(self.badge_id(), event, |m: &MoveMetadata| {
            Some(m.user_address.as_str())
        })
    }

    async fn handle(
        &self,
        event: &DomainEvent,
        current: Option<&UserProgress>,
    ) -> Result<Option<ObserverOutcome>, ObserverError> {
        let metadata: MoveMetadata = event.metadata()?;
        let user = validate_address(&metadata.user_address)?;
        let title = scene_title(metadata.scene_title);
        let key = Self::cache_key(&user, metadata.session_id.trim());

        let previous = self.current_visit(&key).await;
        if let Some(visit) = &previous {
            if event.timestamp < visit.entered_at {
                debug!(key = %key, "Stale move ignored");
                return Ok(None);
            }
            if visit.scene_title == title {
                return Ok(None);
            }
        }

        let entered = SceneVisit {
            scene_title: title,
            entered_at: event.timestamp,
        };
        match serde_json::to_value(&entered) {
            Ok(value) => {
                if let Err(e) = self.cache.set(&key, value).await {
                    warn!(key = %key, error = %e, "Failed to record scene visit");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "Failed to encode scene visit"),
        }

        let Some(SceneVisit {
            scene_title: Some(left),
            entered_at,
        }) = previous
        else {
            return Ok(None);
        };
        if event.timestamp - entered_at < self.min_stay {
            return Ok(None);
        }

        let mut progress = UserProgress::or_new(current, BadgeId::Traveler, &user);
        if progress.is_completed() || progress.progress.evidence.contains_key(&left) {
            return Ok(None);
        }
        progress
            .progress
            .evidence
            .insert_item(EvidenceItem::new(left, entered_at));
        let visited = progress.progress.evidence.items().len() as u32;
        progress.progress.steps = progress.progress.steps.max(visited);

        Ok(Some(finish(&self.definition, progress, Utc::now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::observers::test_support::{at, event, ALICE};
    use serde_json::json;

    fn observer() -> TravelerObserver {
        TravelerObserver::new(
            &BadgeCatalog::standard(),
            Arc::new(InMemoryCache::default()),
            Duration::seconds(60),
        )
        .unwrap()
    }

    fn moved(secs: i64, scene: Option<&str>) -> DomainEvent {
        event(
            MOVE_TO_PARCEL[0],
            secs,
            json!({ "userAddress": ALICE, "sessionId": "s1", "sceneTitle": scene }),
        )
    }

    #[tokio::test]
    async fn test_scene_counted_after_min_stay() {
        let observer = observer();

        assert!(observer.handle(&moved(0, Some("Plaza")), None).await.unwrap().is_none());
        assert!(observer.handle(&moved(30, Some("Plaza")), None).await.unwrap().is_none());

        let outcome = observer
            .handle(&moved(90, Some("Casino")), None)
            .await
            .unwrap()
            .unwrap();
        let items = outcome.updated.progress.evidence.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, "Plaza");
        assert_eq!(items[0].at, at(0));
        assert_eq!(outcome.updated.progress.steps, 1);
        assert!(outcome.granted.is_none());
    }

    #[tokio::test]
    async fn test_short_stay_not_counted() {
        let observer = observer();
        observer.handle(&moved(0, Some("Plaza")), None).await.unwrap();
        assert!(observer.handle(&moved(59, Some("Casino")), None).await.unwrap().is_none());

        // The short visit to Casino still becomes the current scene.
        let outcome = observer.handle(&moved(200, None), None).await.unwrap().unwrap();
        assert_eq!(outcome.updated.progress.evidence.items()[0].key, "Casino");
    }

    #[tokio::test]
    async fn test_revisit_not_counted_twice() {
        let observer = observer();
        observer.handle(&moved(0, Some("Plaza")), None).await.unwrap();
        let first = observer
            .handle(&moved(100, Some("Casino")), None)
            .await
            .unwrap()
            .unwrap();
        let row = first.updated;

        observer.handle(&moved(200, Some("Plaza")), Some(&row)).await.unwrap();
        let again = observer
            .handle(&moved(400, Some("Museum")), Some(&row))
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_stale_move_ignored() {
        let observer = observer();
        observer.handle(&moved(100, Some("Plaza")), None).await.unwrap();
        assert!(observer.handle(&moved(10, Some("Casino")), None).await.unwrap().is_none());
        let outcome = observer.handle(&moved(200, Some("Casino")), None).await.unwrap();
        assert!(outcome.is_some());
    }

    #[tokio::test]
    async fn test_tenth_scene_grants_first_tier() {
        let observer = observer();
        let mut row = UserProgress::new(BadgeId::Traveler, ALICE);
        for n in 0..9 {
            row.progress
                .evidence
                .insert_item(EvidenceItem::new(format!("Scene {}", n), at(n)));
        }
        row.progress.steps = 9;

        observer.handle(&moved(0, Some("Plaza")), Some(&row)).await.unwrap();
        let outcome = observer
            .handle(&moved(61, Some("Casino")), Some(&row))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.updated.progress.steps, 10);
        assert_eq!(outcome.granted.unwrap().tier_ids(), vec!["traveler-starter"]);
    }
}
