//! Keyed families: purchases, published items, friendships, attended events
//! and visited scenes.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

use badge_core::tiers::{self, Timeline};
use badge_core::{
    validate_address, BadgeDefinition, BadgeId, Evidence, EvidenceItem, UserProgress,
};

use super::{check_timestamp, invalid_field, parse_payload};
use crate::error::BackfillError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PurchasesPayload {
    purchases: Vec<Purchase>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Purchase {
    transaction_hash: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    purchased_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PublishedPayload {
    items: Vec<PublishedItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PublishedItem {
    item_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    published_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConnectionsPayload {
    connections: Vec<Connection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Connection {
    address: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct EventsPayload {
    events: Vec<Attendance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Attendance {
    event_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    attended_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ScenesPayload {
    scenes: Vec<SceneVisit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SceneVisit {
    scene_title: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    first_visit_at: DateTime<Utc>,
}

fn non_empty(badge_id: BadgeId, field: &'static str, value: &str) -> Result<String, BackfillError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid_field(badge_id, field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Decode the payload into evidence items keyed the same way the live
/// observers key them.
fn incoming_items(
    badge_id: BadgeId,
    user: &str,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<Vec<EvidenceItem>, BackfillError> {
    let items = match badge_id {
        BadgeId::Fashionista => parse_payload::<PurchasesPayload>(badge_id, payload)?
            .purchases
            .into_iter()
            .map(|p| -> Result<EvidenceItem, BackfillError> {
                check_timestamp(badge_id, "purchasedAt", p.purchased_at, now)?;
                let key = non_empty(badge_id, "transactionHash", &p.transaction_hash)?;
                Ok(EvidenceItem::new(key.to_ascii_lowercase(), p.purchased_at))
            })
            .collect::<Result<Vec<_>, BackfillError>>()?,
        BadgeId::WearableDesigner | BadgeId::EmoteCreator => {
            parse_payload::<PublishedPayload>(badge_id, payload)?
                .items
                .into_iter()
                .map(|i| -> Result<EvidenceItem, BackfillError> {
                    check_timestamp(badge_id, "publishedAt", i.published_at, now)?;
                    let key = non_empty(badge_id, "itemId", &i.item_id)?;
                    Ok(EvidenceItem::new(key.to_ascii_lowercase(), i.published_at))
                })
                .collect::<Result<Vec<_>, BackfillError>>()?
        }
        BadgeId::SocialButterfly => parse_payload::<ConnectionsPayload>(badge_id, payload)?
            .connections
            .into_iter()
            .map(|c| -> Result<EvidenceItem, BackfillError> {
                check_timestamp(badge_id, "connectedAt", c.connected_at, now)?;
                let friend = validate_address(&c.address).map_err(|source| {
                    BackfillError::InvalidPayload { badge_id, source }
                })?;
                if friend == user {
                    return Err(invalid_field(badge_id, "address", "cannot befriend yourself"));
                }
                Ok(EvidenceItem::new(friend, c.connected_at))
            })
            .collect::<Result<Vec<_>, BackfillError>>()?,
        BadgeId::EventEnthusiast => parse_payload::<EventsPayload>(badge_id, payload)?
            .events
            .into_iter()
            .map(|e| -> Result<EvidenceItem, BackfillError> {
                check_timestamp(badge_id, "attendedAt", e.attended_at, now)?;
                let key = non_empty(badge_id, "eventId", &e.event_id)?;
                Ok(EvidenceItem::new(key, e.attended_at))
            })
            .collect::<Result<Vec<_>, BackfillError>>()?,
        BadgeId::Traveler => parse_payload::<ScenesPayload>(badge_id, payload)?
            .scenes
            .into_iter()
            .map(|s| -> Result<EvidenceItem, BackfillError> {
                check_timestamp(badge_id, "firstVisitAt", s.first_visit_at, now)?;
                let key = non_empty(badge_id, "sceneTitle", &s.scene_title)?;
                Ok(EvidenceItem::new(key, s.first_visit_at))
            })
            .collect::<Result<Vec<_>, BackfillError>>()?,
        other => return Err(BackfillError::UnknownBadge(other.to_string())),
    };
    Ok(items)
}

/// Union by key keeping the earliest time, sorted chronologically.
fn union(existing: &[EvidenceItem], incoming: Vec<EvidenceItem>) -> Vec<EvidenceItem> {
    let mut earliest: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
    for item in existing.iter().cloned().chain(incoming) {
        earliest
            .entry(item.key)
            .and_modify(|at| *at = (*at).min(item.at))
            .or_insert(item.at);
    }
    let mut items: Vec<EvidenceItem> = earliest
        .into_iter()
        .map(|(key, at)| EvidenceItem::new(key, at))
        .collect();
    items.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.key.cmp(&b.key)));
    items
}

pub(super) fn merge(
    definition: &BadgeDefinition,
    progress: &mut UserProgress,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<(), BackfillError> {
    let incoming = incoming_items(definition.id, &progress.user_address, payload, now)?;
    let items = union(progress.progress.evidence.items(), incoming);
    let times: Vec<DateTime<Utc>> = items.iter().map(|i| i.at).collect();

    let mut merged = progress.clone();
    merged.progress.steps = merged.progress.steps.max(items.len() as u32);
    merged.progress.evidence = Evidence::Items(items);
    tiers::evaluate_sequence(definition, &mut merged, Timeline::Dated(&times))?;

    *progress = merged;
    Ok(())
}
