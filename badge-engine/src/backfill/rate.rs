//! Rate family: a bare historical count with no per-usage timestamps.
//!
//! Tiers crossed by the count are stamped with the merge time.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use badge_core::tiers::{self, Timeline};
use badge_core::{BadgeDefinition, UserProgress};

use super::parse_payload;
use crate::error::BackfillError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct EmotePayload {
    emote_count: u32,
}

pub(super) fn merge(
    definition: &BadgeDefinition,
    progress: &mut UserProgress,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<(), BackfillError> {
    let incoming: EmotePayload = parse_payload(definition.id, payload)?;

    let mut merged = progress.clone();
    merged.progress.steps = merged.progress.steps.max(incoming.emote_count);
    tiers::evaluate_sequence(definition, &mut merged, Timeline::Undated { now })?;

    *progress = merged;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observers::test_support::{at, ALICE};
    use badge_core::{AchievedTier, BadgeCatalog, BadgeId};
    use serde_json::json;

    #[test]
    fn test_count_crosses_tiers_at_now() {
        let catalog = BadgeCatalog::standard();
        let definition = catalog.definition(BadgeId::Emotionista).unwrap();
        let mut row = UserProgress::new(BadgeId::Emotionista, ALICE);
        row.progress.steps = 120;
        row.achieved_tiers.push(AchievedTier {
            tier_id: "emotionista-starter".to_string(),
            completed_at: at(0),
        });

        merge(&definition, &mut row, &json!({ "emoteCount": 600 }), at(99)).unwrap();

        assert_eq!(row.progress.steps, 600);
        assert_eq!(row.achieved_tiers.len(), 2);
        assert_eq!(row.achieved_tiers[0].completed_at, at(0));
        assert_eq!(row.achieved_tiers[1].completed_at, at(99));
    }

    #[test]
    fn test_lower_count_never_regresses() {
        let catalog = BadgeCatalog::standard();
        let definition = catalog.definition(BadgeId::Emotionista).unwrap();
        let mut row = UserProgress::new(BadgeId::Emotionista, ALICE);
        row.progress.steps = 50;

        merge(&definition, &mut row, &json!({ "emoteCount": 10 }), at(1)).unwrap();
        assert_eq!(row.progress.steps, 50);
        assert!(row.achieved_tiers.is_empty());
    }

    #[test]
    fn test_negative_count_rejected() {
        let catalog = BadgeCatalog::standard();
        let definition = catalog.definition(BadgeId::Emotionista).unwrap();
        let mut row = UserProgress::new(BadgeId::Emotionista, ALICE);
        assert!(merge(&definition, &mut row, &json!({ "emoteCount": -1 }), at(1)).is_err());
    }
}
