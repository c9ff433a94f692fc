//! Backfill merger.
//!
//! Reconciles externally supplied historical data into a progress row
//! without ever regressing it. Each badge family has its own payload shape
//! and merge function; all of them:
//!
//! 1. validate the payload strictly (no unknown fields, semantic checks)
//! 2. union incoming evidence with what is persisted, earliest time wins
//! 3. recompute `steps` from the union, never by addition
//! 4. recompute tiers and completion through [`badge_core::tiers`]
//!
//! The merger never persists and never validates the merged row against
//! the structural invariants; that is the caller's job (see
//! [`crate::engine::BadgeEngine::backfill`]). Merging the same payload
//! twice yields the same row.

mod composite;
mod keyed;
mod milestone;
mod rate;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

use badge_core::{validate_address, BadgeCatalog, BadgeId, UserProgress, ValidationError};

use crate::error::BackfillError;

/// Merges backfill payloads into progress rows.
#[derive(Clone)]
pub struct BackfillMerger {
    catalog: Arc<BadgeCatalog>,
}

impl BackfillMerger {
    pub fn new(catalog: Arc<BadgeCatalog>) -> Self {
        Self { catalog }
    }

    /// Merge `payload` into `current` and return the resulting row.
    ///
    /// On error nothing is returned and `current` is untouched.
    pub fn merge_user_progress(
        &self,
        badge_id: BadgeId,
        user_address: &str,
        current: Option<&UserProgress>,
        payload: &serde_json::Value,
    ) -> Result<UserProgress, BackfillError> {
        let definition = self.catalog.definition(badge_id)?;
        let user = validate_address(user_address).map_err(|source| BackfillError::InvalidPayload {
            badge_id,
            source,
        })?;

        if let Some(row) = current {
            if row.badge_id != badge_id || row.user_address != user {
                return Err(BackfillError::RowMismatch(format!(
                    "expected {}/{}, got {}/{}",
                    badge_id, user, row.badge_id, row.user_address
                )));
            }
        }

        let now = Utc::now();
        let mut merged = UserProgress::or_new(current, badge_id, &user);
        match badge_id {
            BadgeId::DecentralandCitizen | BadgeId::LandArchitect | BadgeId::LegendaryLook => {
                milestone::merge(&definition, &mut merged, payload, now)?
            }
            BadgeId::Fashionista
            | BadgeId::WearableDesigner
            | BadgeId::EmoteCreator
            | BadgeId::SocialButterfly
            | BadgeId::EventEnthusiast
            | BadgeId::Traveler => keyed::merge(&definition, &mut merged, payload, now)?,
            BadgeId::OpenForBusiness => composite::merge(&definition, &mut merged, payload, now)?,
            BadgeId::Emotionista => rate::merge(&definition, &mut merged, payload, now)?,
        }

        if current.is_some_and(|row| same_state(row, &merged)) {
            debug!(badge_id = %badge_id, user = %user, "Backfill changed nothing");
        } else {
            merged.updated_at = now;
            debug!(
                badge_id = %badge_id,
                user = %user,
                steps = merged.progress.steps,
                tiers = merged.achieved_tiers.len(),
                completed = merged.is_completed(),
                "Backfill merged"
            );
        }
        Ok(merged)
    }
}

/// Equal apart from `updated_at`.
fn same_state(a: &UserProgress, b: &UserProgress) -> bool {
    a.progress == b.progress && a.achieved_tiers == b.achieved_tiers && a.completed_at == b.completed_at
}

/// Decode a family payload, mapping shape errors to [`BackfillError::InvalidPayload`].
pub(crate) fn parse_payload<T: DeserializeOwned>(
    badge_id: BadgeId,
    payload: &serde_json::Value,
) -> Result<T, BackfillError> {
    T::deserialize(payload).map_err(|e| BackfillError::InvalidPayload {
        badge_id,
        source: ValidationError::Payload(e.to_string()),
    })
}

/// Build an [`BackfillError::InvalidPayload`] for a field-level problem.
pub(crate) fn invalid_field(
    badge_id: BadgeId,
    field: &'static str,
    reason: impl Into<String>,
) -> BackfillError {
    BackfillError::InvalidPayload {
        badge_id,
        source: ValidationError::field(field, reason),
    }
}

/// Tolerated clock difference between the payload source and this host.
const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// Reject timestamps at or before the epoch, or later than `now` plus the
/// tolerated skew.
pub(crate) fn check_timestamp(
    badge_id: BadgeId,
    field: &'static str,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), BackfillError> {
    if at.timestamp_millis() <= 0 {
        return Err(invalid_field(badge_id, field, "timestamp must be positive"));
    }
    if at > now + Duration::seconds(MAX_CLOCK_SKEW_SECS) {
        return Err(invalid_field(
            badge_id,
            field,
            format!("timestamp {} is in the future", at.to_rfc3339()),
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use badge_core::{BadgeAssets, BadgeCategory, BadgeDefinition, Criteria, Tier};

    use super::*;

    /// Catalog with social-butterfly tiered at the given thresholds.
    pub fn social_catalog(thresholds: &[u32]) -> Arc<BadgeCatalog> {
        let tiers: Vec<Tier> = thresholds
            .iter()
            .map(|s| Tier {
                tier_id: format!("social-butterfly-{}", s),
                tier_name: format!("{} friends", s),
                criteria: Criteria::steps(*s),
                assets: BadgeAssets::default(),
            })
            .collect();
        let social = BadgeDefinition {
            id: BadgeId::SocialButterfly,
            name: "Social Butterfly".to_string(),
            description: String::new(),
            category: BadgeCategory::Socializer,
            criteria: Criteria::steps(thresholds.last().copied().unwrap_or(1)),
            tiers: Some(tiers),
            assets: BadgeAssets::default(),
        };
        let others = badge_core::catalog::standard_definitions()
            .into_iter()
            .filter(|d| d.id != BadgeId::SocialButterfly);
        Arc::new(BadgeCatalog::new(others.chain([social])).unwrap())
    }
}
