//! Tier evaluation shared by observers and the backfill merger.
//!
//! Two entry points:
//!
//! - [`apply_live`]: a step count just changed; every tier whose threshold is
//!   now reached gets stamped with the given time. Increments are usually +1
//!   but nothing here assumes a single tier per call.
//! - [`evaluate_sequence`]: historical data was merged; each crossed tier is
//!   stamped with the time of the item that reached its threshold.
//!
//! Both apply the completion rule: the badge is complete once every tier is
//! achieved (or, untiered, once steps reach the criteria), and an existing
//! completion time only ever moves earlier.

use chrono::{DateTime, Utc};

use crate::error::TierError;
use crate::progress::UserProgress;
use crate::types::{AchievedTier, BadgeDefinition, BadgeGrant, Tier};

/// Result of a live evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveOutcome {
    /// Tiers crossed by this evaluation, ascending
    pub new_tiers: Vec<Tier>,
    /// The badge went from incomplete to complete
    pub completed: bool,
}

impl LiveOutcome {
    /// Nothing crossed and the badge did not complete.
    pub fn is_empty(&self) -> bool {
        self.new_tiers.is_empty() && !self.completed
    }

    /// Grant descriptor for this outcome, if anything was earned.
    pub fn grant(&self, definition: &BadgeDefinition, user_address: &str) -> Option<BadgeGrant> {
        if definition.is_tiered() {
            (!self.new_tiers.is_empty())
                .then(|| BadgeGrant::tiers(definition, &self.new_tiers, user_address))
        } else {
            self.completed
                .then(|| BadgeGrant::whole(definition, user_address))
        }
    }
}

/// Tiers whose threshold is within `steps` and that are not yet achieved.
pub fn newly_crossed<'a>(tiers: &'a [Tier], achieved: &[AchievedTier], steps: u32) -> Vec<&'a Tier> {
    tiers
        .iter()
        .filter(|t| t.criteria.steps <= steps)
        .filter(|t| !achieved.iter().any(|a| a.tier_id == t.tier_id))
        .collect()
}

/// Stamp newly crossed tiers with `at` and apply the completion rule.
///
/// For untiered badges `at` is also the completion time when the criteria
/// are met for the first time.
pub fn apply_live(
    definition: &BadgeDefinition,
    progress: &mut UserProgress,
    at: DateTime<Utc>,
) -> LiveOutcome {
    let was_completed = progress.is_completed();

    let crossed: Vec<Tier> = newly_crossed(
        definition.tiers(),
        &progress.achieved_tiers,
        progress.progress.steps,
    )
    .into_iter()
    .cloned()
    .collect();

    for tier in &crossed {
        progress.achieved_tiers.push(AchievedTier {
            tier_id: tier.tier_id.clone(),
            completed_at: at,
        });
    }
    sort_by_tier_order(definition, &mut progress.achieved_tiers);

    if definition.is_tiered() {
        complete_tiered(definition, progress);
    } else if progress.progress.steps >= definition.criteria.steps {
        progress.completed_at = Some(earliest(progress.completed_at, at));
    }

    LiveOutcome {
        new_tiers: crossed,
        completed: !was_completed && progress.is_completed(),
    }
}

/// Source of per-step timestamps for the backfill path.
#[derive(Debug, Clone, Copy)]
pub enum Timeline<'a> {
    /// Chronologically sorted time of each counted item
    Dated(&'a [DateTime<Utc>]),
    /// Legacy families with no per-item time; crossings happen at `now`
    Undated { now: DateTime<Utc> },
}

impl Timeline<'_> {
    /// Time at which step `index + 1` was reached.
    fn time_at(&self, index: usize) -> Option<DateTime<Utc>> {
        match self {
            Timeline::Dated(times) => times.get(index).copied(),
            Timeline::Undated { now } => Some(*now),
        }
    }
}

/// Recompute achieved tiers and completion from a chronological sequence.
///
/// Tiers already recorded keep their time when it is earlier than the
/// derived one and are never dropped. Returns the tiers that were not
/// achieved before. On error `progress` is left untouched.
pub fn evaluate_sequence(
    definition: &BadgeDefinition,
    progress: &mut UserProgress,
    timeline: Timeline<'_>,
) -> Result<Vec<Tier>, TierError> {
    let steps = progress.progress.steps;
    let mut rebuilt: Vec<AchievedTier> = Vec::with_capacity(definition.tiers().len());

    for tier in definition.tiers() {
        let existing = progress
            .achieved_tiers
            .iter()
            .find(|a| a.tier_id == tier.tier_id)
            .map(|a| a.completed_at);
        let crossed = tier.criteria.steps <= steps;
        if !crossed && existing.is_none() {
            continue;
        }

        let index = tier.criteria.steps.saturating_sub(1) as usize;
        let derived = if crossed { timeline.time_at(index) } else { None };
        let completed_at = match (existing, derived) {
            (Some(e), Some(d)) => e.min(d),
            (Some(e), None) => e,
            (None, Some(d)) => d,
            (None, None) => {
                return Err(TierError::MissingEvidence {
                    badge_id: definition.id,
                    tier_id: tier.tier_id.clone(),
                    index,
                })
            }
        };
        rebuilt.push(AchievedTier {
            tier_id: tier.tier_id.clone(),
            completed_at,
        });
    }

    // A higher tier cannot have been reached before a lower one.
    for i in (0..rebuilt.len().saturating_sub(1)).rev() {
        if rebuilt[i].completed_at > rebuilt[i + 1].completed_at {
            rebuilt[i].completed_at = rebuilt[i + 1].completed_at;
        }
    }

    let untiered_completion = if !definition.is_tiered() && steps >= definition.criteria.steps {
        let index = definition.criteria.steps.saturating_sub(1) as usize;
        match (progress.completed_at, timeline.time_at(index)) {
            (Some(e), Some(d)) => Some(e.min(d)),
            (Some(e), None) => Some(e),
            (None, Some(d)) => Some(d),
            (None, None) => {
                return Err(TierError::MissingEvidence {
                    badge_id: definition.id,
                    tier_id: definition.id.to_string(),
                    index,
                })
            }
        }
    } else {
        progress.completed_at
    };

    let new_tiers: Vec<Tier> = rebuilt
        .iter()
        .filter(|a| !progress.has_tier(&a.tier_id))
        .filter_map(|a| definition.tier(&a.tier_id).cloned())
        .collect();

    progress.achieved_tiers = rebuilt;
    if definition.is_tiered() {
        complete_tiered(definition, progress);
    } else {
        progress.completed_at = untiered_completion;
    }

    Ok(new_tiers)
}

/// Set completion once every tier is achieved; never moves it later.
fn complete_tiered(definition: &BadgeDefinition, progress: &mut UserProgress) {
    if progress.achieved_tiers.len() < definition.tiers().len() {
        return;
    }
    if let Some(last) = progress.achieved_tiers.last() {
        progress.completed_at = Some(earliest(progress.completed_at, last.completed_at));
    }
}

fn earliest(existing: Option<DateTime<Utc>>, candidate: DateTime<Utc>) -> DateTime<Utc> {
    existing.map_or(candidate, |e| e.min(candidate))
}

fn sort_by_tier_order(definition: &BadgeDefinition, achieved: &mut [AchievedTier]) {
    let order = |id: &str| {
        definition
            .tiers()
            .iter()
            .position(|t| t.tier_id == id)
            .unwrap_or(usize::MAX)
    };
    achieved.sort_by_key(|a| order(&a.tier_id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BadgeAssets, BadgeCategory, BadgeId, Criteria};
    use chrono::{Duration, TimeZone};

    const USER: &str = "0x1111111111111111111111111111111111111111";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn tiered(thresholds: &[u32]) -> BadgeDefinition {
        let tiers: Vec<Tier> = thresholds
            .iter()
            .map(|s| Tier {
                tier_id: format!("t{}", s),
                tier_name: format!("Tier {}", s),
                criteria: Criteria::steps(*s),
                assets: BadgeAssets::default(),
            })
            .collect();
        BadgeDefinition {
            id: BadgeId::SocialButterfly,
            name: "Social Butterfly".to_string(),
            description: String::new(),
            category: BadgeCategory::Socializer,
            criteria: Criteria::steps(*thresholds.last().unwrap()),
            tiers: Some(tiers),
            assets: BadgeAssets::default(),
        }
    }

    fn untiered(steps: u32) -> BadgeDefinition {
        BadgeDefinition {
            id: BadgeId::LandArchitect,
            name: "Land Architect".to_string(),
            description: String::new(),
            category: BadgeCategory::Builder,
            criteria: Criteria::steps(steps),
            tiers: None,
            assets: BadgeAssets::default(),
        }
    }

    fn row(badge: BadgeId, steps: u32) -> UserProgress {
        let mut row = UserProgress::new(badge, USER);
        row.progress.steps = steps;
        row
    }

    #[test]
    fn test_newly_crossed_handles_multiple() {
        let def = tiered(&[1, 5, 10]);
        let achieved = vec![AchievedTier {
            tier_id: "t1".to_string(),
            completed_at: at(0),
        }];
        let crossed = newly_crossed(def.tiers(), &achieved, 10);
        let ids: Vec<_> = crossed.iter().map(|t| t.tier_id.as_str()).collect();
        assert_eq!(ids, vec!["t5", "t10"]);
        assert!(newly_crossed(def.tiers(), &achieved, 4).is_empty());
    }

    #[test]
    fn test_apply_live_single_tier() {
        let def = tiered(&[1, 5, 10]);
        let mut progress = row(def.id, 4);
        progress.achieved_tiers.push(AchievedTier {
            tier_id: "t1".to_string(),
            completed_at: at(0),
        });

        progress.progress.steps = 5;
        let outcome = apply_live(&def, &mut progress, at(100));

        assert_eq!(outcome.new_tiers.len(), 1);
        assert_eq!(outcome.new_tiers[0].tier_id, "t5");
        assert!(!outcome.completed);
        assert_eq!(progress.achieved_tiers.len(), 2);
        assert_eq!(progress.achieved_tiers[1].completed_at, at(100));
        assert!(progress.completed_at.is_none());

        let grant = outcome.grant(&def, USER).unwrap();
        assert_eq!(grant.tier_ids(), vec!["t5"]);
    }

    #[test]
    fn test_apply_live_jump_completes() {
        let def = tiered(&[1, 5, 10]);
        let mut progress = row(def.id, 12);
        let outcome = apply_live(&def, &mut progress, at(7));
        assert_eq!(outcome.new_tiers.len(), 3);
        assert!(outcome.completed);
        assert_eq!(progress.completed_at, Some(at(7)));
        assert!(progress.validate(&def).is_ok());
    }

    #[test]
    fn test_apply_live_untiered() {
        let def = untiered(1);
        let mut progress = row(def.id, 0);
        assert!(apply_live(&def, &mut progress, at(1)).is_empty());

        progress.progress.steps = 1;
        let outcome = apply_live(&def, &mut progress, at(2));
        assert!(outcome.completed);
        assert_eq!(progress.completed_at, Some(at(2)));
        assert_eq!(outcome.grant(&def, USER).unwrap().badge_granted, def);

        // Re-applying does not move the completion or re-grant
        let again = apply_live(&def, &mut progress, at(3));
        assert!(again.is_empty());
        assert_eq!(progress.completed_at, Some(at(2)));
    }

    #[test]
    fn test_sequence_stamps_threshold_items() {
        let def = tiered(&[1, 5, 10]);
        let times: Vec<_> = (0..10).map(|i| at(i * 60)).collect();
        let mut progress = row(def.id, 10);

        let new = evaluate_sequence(&def, &mut progress, Timeline::Dated(&times)).unwrap();

        assert_eq!(new.len(), 3);
        assert_eq!(progress.achieved_tiers[0].completed_at, times[0]);
        assert_eq!(progress.achieved_tiers[1].completed_at, times[4]);
        assert_eq!(progress.achieved_tiers[2].completed_at, times[9]);
        assert_eq!(progress.completed_at, Some(times[9]));
    }

    #[test]
    fn test_sequence_keeps_earlier_times() {
        let def = tiered(&[1, 5, 10]);
        let times: Vec<_> = (0..5).map(|i| at(1000 + i)).collect();
        let mut progress = row(def.id, 5);
        progress.achieved_tiers.push(AchievedTier {
            tier_id: "t1".to_string(),
            completed_at: at(0),
        });

        let new = evaluate_sequence(&def, &mut progress, Timeline::Dated(&times)).unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(progress.achieved_tiers[0].completed_at, at(0));
        assert_eq!(progress.achieved_tiers[1].completed_at, times[4]);
    }

    #[test]
    fn test_sequence_missing_evidence() {
        let def = tiered(&[1, 5, 10]);
        let times = vec![at(0), at(1)];
        let mut progress = row(def.id, 5);
        let before = progress.clone();

        let err = evaluate_sequence(&def, &mut progress, Timeline::Dated(&times)).unwrap_err();
        assert!(matches!(err, TierError::MissingEvidence { index: 4, .. }));
        assert_eq!(progress, before);
    }

    #[test]
    fn test_sequence_undated_falls_back_to_now() {
        let def = tiered(&[1, 5, 10]);
        let now = at(500);
        let mut progress = row(def.id, 6);
        let new = evaluate_sequence(&def, &mut progress, Timeline::Undated { now }).unwrap();
        assert_eq!(new.len(), 2);
        assert!(progress.achieved_tiers.iter().all(|t| t.completed_at == now));
    }

    #[test]
    fn test_sequence_completion_never_later() {
        let def = tiered(&[1, 2]);
        let times = vec![at(10), at(20)];
        let mut progress = row(def.id, 2);
        progress.completed_at = Some(at(5));
        progress.achieved_tiers = vec![
            AchievedTier {
                tier_id: "t1".to_string(),
                completed_at: at(1),
            },
            AchievedTier {
                tier_id: "t2".to_string(),
                completed_at: at(5),
            },
        ];

        evaluate_sequence(&def, &mut progress, Timeline::Dated(&times)).unwrap();
        assert_eq!(progress.completed_at, Some(at(5)));

        let mut later = row(def.id, 2);
        later.completed_at = Some(at(50));
        later.achieved_tiers = progress.achieved_tiers.clone();
        later.achieved_tiers[1].completed_at = at(50);
        evaluate_sequence(&def, &mut later, Timeline::Dated(&times)).unwrap();
        assert_eq!(later.completed_at, Some(at(20)));
    }

    #[test]
    fn test_sequence_orders_tier_times() {
        let def = tiered(&[1, 2]);
        let times = vec![at(100), at(200)];
        let mut progress = row(def.id, 2);
        progress.achieved_tiers = vec![AchievedTier {
            tier_id: "t2".to_string(),
            completed_at: at(50),
        }];
        // Legacy row with only the top tier recorded
        evaluate_sequence(&def, &mut progress, Timeline::Dated(&times)).unwrap();
        assert_eq!(progress.achieved_tiers[0].completed_at, at(50));
        assert_eq!(progress.achieved_tiers[1].completed_at, at(50));
        assert!(progress.validate(&def).is_ok());
    }

    #[test]
    fn test_sequence_untiered_uses_criteria_index() {
        let def = untiered(2);
        let times = vec![at(3), at(9)];
        let mut progress = row(def.id, 2);
        evaluate_sequence(&def, &mut progress, Timeline::Dated(&times)).unwrap();
        assert_eq!(progress.completed_at, Some(at(9)));

        let again = progress.clone();
        evaluate_sequence(&def, &mut progress, Timeline::Dated(&times)).unwrap();
        assert_eq!(progress, again);
        assert!(progress.completed_at.unwrap() - at(0) > Duration::zero());
    }
}
