//! Normalized domain events.
//!
//! Events arrive already parsed from the transport layer; the engine only
//! sees this shape. Metadata stays JSON until an observer decodes it into
//! the typed struct it cares about.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Source system of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// In-world client telemetry
    Client,
    /// Content server deployments
    Catalyst,
    /// On-chain activity
    Blockchain,
    /// Social service
    Social,
}

/// What happened, within an [`EventType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSubType {
    MoveToParcel,
    UsedEmote,
    EventAttended,
    SceneDeployed,
    ProfileDeployed,
    StoreSettingsDeployed,
    ItemSold,
    ItemPublished,
    FriendshipAccepted,
}

/// Routing key of an event: (type, subtype).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub event_type: EventType,
    pub sub_type: EventSubType,
}

impl EventKey {
    pub const fn new(event_type: EventType, sub_type: EventSubType) -> Self {
        Self {
            event_type,
            sub_type,
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.event_type, self.sub_type)
    }
}

/// A normalized platform occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub sub_type: EventSubType,
    /// Producer-assigned identity of the event
    pub key: String,
    /// When the event happened (epoch milliseconds on the wire)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl DomainEvent {
    /// Create a new event.
    pub fn new(
        key: EventKey,
        event_key: impl Into<String>,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            event_type: key.event_type,
            sub_type: key.sub_type,
            key: event_key.into(),
            timestamp,
            metadata,
        }
    }

    /// Routing key of this event.
    pub fn event_key(&self) -> EventKey {
        EventKey::new(self.event_type, self.sub_type)
    }

    /// Decode metadata into an observer-specific shape.
    pub fn metadata<T: DeserializeOwned>(&self) -> Result<T, ValidationError> {
        T::deserialize(&self.metadata).map_err(|e| ValidationError::Metadata {
            event: self.event_key().to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Move {
        user_address: String,
    }

    #[test]
    fn test_event_wire_format() {
        let json = r#"{
            "type": "client",
            "subType": "move_to_parcel",
            "key": "evt-1",
            "timestamp": 1700000000000,
            "metadata": { "userAddress": "0xabc" }
        }"#;
        let event: DomainEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event.event_key(),
            EventKey::new(EventType::Client, EventSubType::MoveToParcel)
        );
        assert_eq!(
            event.timestamp,
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
        );
        let meta: Move = event.metadata().unwrap();
        assert_eq!(meta.user_address, "0xabc");
    }

    #[test]
    fn test_bad_metadata_is_validation_error() {
        let event = DomainEvent::new(
            EventKey::new(EventType::Client, EventSubType::MoveToParcel),
            "evt",
            Utc::now(),
            serde_json::json!({ "other": 1 }),
        );
        let err = event.metadata::<Move>().unwrap_err();
        assert!(matches!(err, ValidationError::Metadata { .. }));
    }
}
