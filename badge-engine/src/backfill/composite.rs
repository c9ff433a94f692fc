//! Composite family: independently dated sub-conditions.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

use badge_core::tiers::{self, Timeline};
use badge_core::{BadgeDefinition, Evidence, UserProgress};

use super::{check_timestamp, parse_payload};
use crate::error::BackfillError;
use crate::observers::{ITEM_PUBLISHED, STORE_COMPLETED};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StorePayload {
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    store_completed_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    item_published_at: Option<DateTime<Utc>>,
}

pub(super) fn merge(
    definition: &BadgeDefinition,
    progress: &mut UserProgress,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<(), BackfillError> {
    let badge_id = definition.id;
    let incoming: StorePayload = parse_payload(badge_id, payload)?;

    let mut conditions: BTreeMap<String, DateTime<Utc>> = match &progress.progress.evidence {
        Evidence::Conditions(existing) => existing.clone(),
        _ => BTreeMap::new(),
    };
    for (name, field, at) in [
        (STORE_COMPLETED, "storeCompletedAt", incoming.store_completed_at),
        (ITEM_PUBLISHED, "itemPublishedAt", incoming.item_published_at),
    ] {
        let Some(at) = at else { continue };
        check_timestamp(badge_id, field, at, now)?;
        conditions
            .entry(name.to_string())
            .and_modify(|existing| *existing = (*existing).min(at))
            .or_insert(at);
    }

    let mut times: Vec<DateTime<Utc>> = conditions.values().copied().collect();
    times.sort();

    let mut merged = progress.clone();
    merged.progress.steps = merged.progress.steps.max(conditions.len() as u32);
    merged.progress.evidence = Evidence::Conditions(conditions);
    tiers::evaluate_sequence(definition, &mut merged, Timeline::Dated(&times))?;

    *progress = merged;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::backfill::BackfillMerger;
    use crate::error::BackfillError;
    use crate::observers::test_support::{at, ALICE};
    use badge_core::{BadgeCatalog, BadgeId};
    use serde_json::json;
    use std::sync::Arc;

    fn merger() -> BackfillMerger {
        BackfillMerger::new(Arc::new(BadgeCatalog::standard()))
    }

    #[test]
    fn test_conditions_across_payloads() {
        let merger = merger();
        let store_only = merger
            .merge_user_progress(
                BadgeId::OpenForBusiness,
                ALICE,
                None,
                &json!({ "storeCompletedAt": at(40).timestamp_millis() }),
            )
            .unwrap();
        assert_eq!(store_only.progress.steps, 1);
        assert!(store_only.completed_at.is_none());

        let both = merger
            .merge_user_progress(
                BadgeId::OpenForBusiness,
                ALICE,
                Some(&store_only),
                &json!({ "itemPublishedAt": at(10).timestamp_millis() }),
            )
            .unwrap();
        assert_eq!(both.progress.steps, 2);
        assert_eq!(both.completed_at, Some(at(40)));
    }

    #[test]
    fn test_empty_payload_is_noop() {
        let merged = merger()
            .merge_user_progress(BadgeId::OpenForBusiness, ALICE, None, &json!({}))
            .unwrap();
        assert_eq!(merged.progress.steps, 0);
        assert!(merged.completed_at.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = merger().merge_user_progress(
            BadgeId::OpenForBusiness,
            ALICE,
            None,
            &json!({ "storeCompleted": true }),
        );
        assert!(matches!(result, Err(BackfillError::InvalidPayload { .. })));
    }
}
