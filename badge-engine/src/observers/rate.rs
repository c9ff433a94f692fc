//! Emotionista: emote usages counted at most once per window per session.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use badge_core::{
    validate_address, BadgeCatalog, BadgeDefinition, BadgeId, CatalogError, DomainEvent,
    EventKey, EventSubType, EventType, UserProgress,
};

use super::{finish, subject_from, BadgeObserver, ObserverOutcome};
use crate::cache::EphemeralCache;
use crate::error::ObserverError;

const USED_EMOTE: [EventKey; 1] = [EventKey::new(EventType::Client, EventSubType::UsedEmote)];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsedEmoteMetadata {
    user_address: String,
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastCounted {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    last_counted_at: DateTime<Utc>,
}

pub struct EmotionistaObserver {
    definition: Arc<BadgeDefinition>,
    cache: Arc<dyn EphemeralCache>,
    window: Duration,
}

impl EmotionistaObserver {
    pub fn new(
        catalog: &BadgeCatalog,
        cache: Arc<dyn EphemeralCache>,
        window: Duration,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            definition: catalog.definition(BadgeId::Emotionista)?,
            cache,
            window,
        })
    }

    fn cache_key(user: &str, session_id: &str) -> String {
        format!("emotionista:{}:{}", user, session_id)
    }

    /// Whether this usage falls outside the session's current window.
    ///
    /// A cache that cannot be read counts nothing.
    async fn outside_window(&self, key: &str, at: DateTime<Utc>) -> bool {
        match self.cache.get(key).await {
            Ok(Some(value)) => match serde_json::from_value::<LastCounted>(value) {
                Ok(last) => at >= last.last_counted_at + self.window,
                Err(_) => true,
            },
            Ok(None) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "Emote window unreadable, usage not counted");
                false
            }
        }
    }
}

#[async_trait]
impl BadgeObserver for EmotionistaObserver {
    fn badge_id(&self) -> BadgeId {
        BadgeId::Emotionista
    }

    fn events(&self) -> &[EventKey] {
        &USED_EMOTE
    }

    fn user_address(&self, event: &DomainEvent) -> Option<String> {
        subject_from(self.badge_id(), event, |m: &UsedEmoteMetadata| {
            Some(m.user_address.as_str())
        })
    }

    async fn handle(
        &self,
        event: &DomainEvent,
        current: Option<&UserProgress>,
    ) -> Result<Option<ObserverOutcome>, ObserverError> {
        let metadata: UsedEmoteMetadata = event.metadata()?;
        let user = validate_address(&metadata.user_address)?;
        if current.is_some_and(UserProgress::is_completed) {
            return Ok(None);
        }

        let key = Self::cache_key(&user, metadata.session_id.trim());
        if !self.outside_window(&key, event.timestamp).await {
            return Ok(None);
        }
        let window = json!({ "lastCountedAt": event.timestamp.timestamp_millis() });
        if let Err(e) = self.cache.set(&key, window).await {
            warn!(key = %key, error = %e, "Failed to record emote window");
        }

        let mut progress = UserProgress::or_new(current, BadgeId::Emotionista, &user);
        progress.progress.steps += 1;
        Ok(Some(finish(&self.definition, progress, Utc::now())))
    }
}
