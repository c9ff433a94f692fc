//! Per-(user, badge) progress records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ValidationError;
use crate::types::{AchievedTier, BadgeDefinition, BadgeId};

/// Lowercase and trim a wallet address.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// Normalize and check that `address` is a `0x`-prefixed 20-byte hex string.
pub fn validate_address(address: &str) -> Result<String, ValidationError> {
    let normalized = normalize_address(address);
    let hex = normalized
        .strip_prefix("0x")
        .ok_or_else(|| ValidationError::field("userAddress", "missing 0x prefix"))?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::field(
            "userAddress",
            format!("`{}` is not a 20-byte hex address", address),
        ));
    }
    Ok(normalized)
}

/// Store key of a progress row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressKey {
    pub badge_id: BadgeId,
    pub user_address: String,
}

impl ProgressKey {
    pub fn new(badge_id: BadgeId, user_address: &str) -> Self {
        Self {
            badge_id,
            user_address: normalize_address(user_address),
        }
    }
}

/// One unit of deduplicated evidence, identified by its natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Natural identity (tx hash, item id, counterpart, scene title, ...)
    pub key: String,
    /// When the occurrence happened
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub at: DateTime<Utc>,
}

impl EvidenceItem {
    pub fn new(key: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            at,
        }
    }
}

/// Family-specific evidence backing the step count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Evidence {
    /// Only the step counter matters
    #[default]
    None,
    /// Unique occurrences, chronologically sorted, unique by key
    Items(Vec<EvidenceItem>),
    /// Named sub-conditions and when each became true
    Conditions(BTreeMap<String, DateTime<Utc>>),
}

impl Evidence {
    /// Recorded items, empty for other evidence kinds.
    pub fn items(&self) -> &[EvidenceItem] {
        match self {
            Evidence::Items(items) => items,
            _ => &[],
        }
    }

    /// Whether an item with this identity is already recorded.
    pub fn contains_key(&self, key: &str) -> bool {
        self.items().iter().any(|i| i.key == key)
    }

    /// Insert an item keeping chronological order, ties ordered by key.
    ///
    /// Returns `false` without touching anything if the key is present.
    pub fn insert_item(&mut self, item: EvidenceItem) -> bool {
        if !matches!(self, Evidence::Items(_)) {
            *self = Evidence::Items(Vec::new());
        }
        let Evidence::Items(items) = self else {
            return false;
        };
        if items.iter().any(|i| i.key == item.key) {
            return false;
        }
        let pos = items
            .partition_point(|i| (i.at, i.key.as_str()) <= (item.at, item.key.as_str()));
        items.insert(pos, item);
        true
    }

    /// When a named condition became true.
    pub fn condition(&self, name: &str) -> Option<DateTime<Utc>> {
        match self {
            Evidence::Conditions(conditions) => conditions.get(name).copied(),
            _ => None,
        }
    }

    /// Record a condition; returns `false` if it was already recorded.
    pub fn set_condition(&mut self, name: &str, at: DateTime<Utc>) -> bool {
        if !matches!(self, Evidence::Conditions(_)) {
            *self = Evidence::Conditions(BTreeMap::new());
        }
        let Evidence::Conditions(conditions) = self else {
            return false;
        };
        if conditions.contains_key(name) {
            return false;
        }
        conditions.insert(name.to_string(), at);
        true
    }

    /// Number of recorded conditions.
    pub fn condition_count(&self) -> usize {
        match self {
            Evidence::Conditions(conditions) => conditions.len(),
            _ => 0,
        }
    }
}

/// Accumulated progress for one badge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Canonical count compared against tier thresholds
    pub steps: u32,
    #[serde(default)]
    pub evidence: Evidence,
}

/// Progress row, keyed by (user, badge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub user_address: String,
    pub badge_id: BadgeId,
    pub progress: Progress,
    /// Append-only, ascending by tier criteria
    #[serde(default)]
    pub achieved_tiers: Vec<AchievedTier>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UserProgress {
    /// Fresh row with zero steps.
    pub fn new(badge_id: BadgeId, user_address: &str) -> Self {
        Self {
            user_address: normalize_address(user_address),
            badge_id,
            progress: Progress::default(),
            achieved_tiers: Vec::new(),
            completed_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Existing row or a fresh one.
    pub fn or_new(current: Option<&UserProgress>, badge_id: BadgeId, user_address: &str) -> Self {
        current
            .cloned()
            .unwrap_or_else(|| Self::new(badge_id, user_address))
    }

    pub fn key(&self) -> ProgressKey {
        ProgressKey::new(self.badge_id, &self.user_address)
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn steps(&self) -> u32 {
        self.progress.steps
    }

    pub fn has_tier(&self, tier_id: &str) -> bool {
        self.achieved_tiers.iter().any(|t| t.tier_id == tier_id)
    }

    /// Check the structural invariants against the badge definition.
    pub fn validate(&self, definition: &BadgeDefinition) -> Result<(), ValidationError> {
        let fail = |reason: String| ValidationError::Progress {
            badge_id: self.badge_id,
            reason,
        };

        if self.badge_id != definition.id {
            return Err(fail(format!("row belongs to {}", definition.id)));
        }

        let tiers = definition.tiers();
        if self.achieved_tiers.len() > tiers.len() {
            return Err(fail(format!(
                "{} achieved tiers but badge has {}",
                self.achieved_tiers.len(),
                tiers.len()
            )));
        }

        // Achieved tiers must be a prefix walk of the ascending tier list.
        let mut last_index: Option<usize> = None;
        let mut last_time: Option<DateTime<Utc>> = None;
        for achieved in &self.achieved_tiers {
            let index = tiers
                .iter()
                .position(|t| t.tier_id == achieved.tier_id)
                .ok_or_else(|| fail(format!("unknown tier {}", achieved.tier_id)))?;
            if last_index.is_some_and(|prev| index <= prev) {
                return Err(fail(format!(
                    "tier {} out of order or duplicated",
                    achieved.tier_id
                )));
            }
            if last_time.is_some_and(|prev| achieved.completed_at < prev) {
                return Err(fail(format!(
                    "tier {} completed before a lower tier",
                    achieved.tier_id
                )));
            }
            last_index = Some(index);
            last_time = Some(achieved.completed_at);
        }

        let should_be_complete = if definition.is_tiered() {
            self.achieved_tiers.len() == tiers.len()
        } else {
            self.progress.steps >= definition.criteria.steps
        };
        if should_be_complete != self.completed_at.is_some() {
            return Err(fail(format!(
                "completedAt is {} but completion criteria {} met",
                if self.completed_at.is_some() { "set" } else { "unset" },
                if should_be_complete { "are" } else { "are not" }
            )));
        }

        if let Evidence::Items(items) = &self.progress.evidence {
            if items.windows(2).any(|w| w[0].at > w[1].at) {
                return Err(fail("evidence items not chronological".to_string()));
            }
        }

        Ok(())
    }
}
