//! Single-milestone families: one dated fact completes the badge.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use badge_core::tiers::{self, Timeline};
use badge_core::{BadgeDefinition, BadgeId, UserProgress};

use super::{check_timestamp, parse_payload};
use crate::error::BackfillError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FirstSeen {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    first_seen_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FirstDeployment {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    first_deployment_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Achieved {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    achieved_at: DateTime<Utc>,
}

fn milestone_time(
    badge_id: BadgeId,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, BackfillError> {
    let (field, at) = match badge_id {
        BadgeId::DecentralandCitizen => (
            "firstSeenAt",
            parse_payload::<FirstSeen>(badge_id, payload)?.first_seen_at,
        ),
        BadgeId::LandArchitect => (
            "firstDeploymentAt",
            parse_payload::<FirstDeployment>(badge_id, payload)?.first_deployment_at,
        ),
        BadgeId::LegendaryLook => (
            "achievedAt",
            parse_payload::<Achieved>(badge_id, payload)?.achieved_at,
        ),
        other => return Err(BackfillError::UnknownBadge(other.to_string())),
    };
    check_timestamp(badge_id, field, at, now)?;
    Ok(at)
}

pub(super) fn merge(
    definition: &BadgeDefinition,
    progress: &mut UserProgress,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<(), BackfillError> {
    let at = milestone_time(definition.id, payload, now)?;

    let mut merged = progress.clone();
    merged.progress.steps = merged.progress.steps.max(definition.criteria.steps);
    let times = vec![at; definition.criteria.steps as usize];
    tiers::evaluate_sequence(definition, &mut merged, Timeline::Dated(&times))?;

    *progress = merged;
    Ok(())
}
