//! Badge definitions, tiers and grant records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::error::CatalogError;

/// Identifier of every badge the engine knows how to progress.
///
/// Criteria are fixed logic per badge, so the set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "kebab-case")]
pub enum BadgeId {
    DecentralandCitizen,
    Traveler,
    Emotionista,
    Fashionista,
    WearableDesigner,
    EmoteCreator,
    SocialButterfly,
    EventEnthusiast,
    LandArchitect,
    OpenForBusiness,
    LegendaryLook,
}

impl BadgeId {
    /// All badge ids, in catalog order.
    pub const ALL: [BadgeId; 11] = [
        BadgeId::DecentralandCitizen,
        BadgeId::Traveler,
        BadgeId::Emotionista,
        BadgeId::Fashionista,
        BadgeId::WearableDesigner,
        BadgeId::EmoteCreator,
        BadgeId::SocialButterfly,
        BadgeId::EventEnthusiast,
        BadgeId::LandArchitect,
        BadgeId::OpenForBusiness,
        BadgeId::LegendaryLook,
    ];

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BadgeId::DecentralandCitizen => "decentraland-citizen",
            BadgeId::Traveler => "traveler",
            BadgeId::Emotionista => "emotionista",
            BadgeId::Fashionista => "fashionista",
            BadgeId::WearableDesigner => "wearable-designer",
            BadgeId::EmoteCreator => "emote-creator",
            BadgeId::SocialButterfly => "social-butterfly",
            BadgeId::EventEnthusiast => "event-enthusiast",
            BadgeId::LandArchitect => "land-architect",
            BadgeId::OpenForBusiness => "open-for-business",
            BadgeId::LegendaryLook => "legendary-look",
        }
    }
}

impl fmt::Display for BadgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BadgeId {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BadgeId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| CatalogError::UnknownBadge(s.to_string()))
    }
}

/// Broad grouping used by clients to lay out badges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum BadgeCategory {
    Explorer,
    Collector,
    Creator,
    Socializer,
    Builder,
}

/// Completion criteria for a badge or a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Criteria {
    /// Number of counted steps required
    pub steps: u32,
}

impl Criteria {
    pub const fn steps(steps: u32) -> Self {
        Self { steps }
    }
}

/// Display assets for a badge or tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct BadgeAssets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_2d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_3d: Option<String>,
}

/// A named threshold inside a badge's progression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    /// Stable identifier, never reused across badges
    pub tier_id: String,
    /// Display name ("Bronze", "Gold", ...)
    pub tier_name: String,
    /// Steps needed to reach this tier
    pub criteria: Criteria,
    #[serde(default)]
    pub assets: BadgeAssets,
}

/// Immutable definition of a badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct BadgeDefinition {
    pub id: BadgeId,
    pub name: String,
    pub description: String,
    pub category: BadgeCategory,
    /// For tiered badges this equals the last tier's criteria
    pub criteria: Criteria,
    /// Ordered by ascending criteria
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiers: Option<Vec<Tier>>,
    #[serde(default)]
    pub assets: BadgeAssets,
}

impl BadgeDefinition {
    /// Whether progression is split into tiers.
    pub fn is_tiered(&self) -> bool {
        self.tiers.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// Tiers in ascending order, empty for untiered badges.
    pub fn tiers(&self) -> &[Tier] {
        self.tiers.as_deref().unwrap_or(&[])
    }

    /// Find a tier by id.
    pub fn tier(&self, tier_id: &str) -> Option<&Tier> {
        self.tiers().iter().find(|t| t.tier_id == tier_id)
    }

    /// Steps at which the badge as a whole is complete.
    pub fn required_steps(&self) -> u32 {
        self.tiers()
            .last()
            .map(|t| t.criteria.steps)
            .unwrap_or(self.criteria.steps)
    }

    /// Copy of this definition restricted to the given tiers.
    ///
    /// Used to build grants that only announce newly achieved tiers.
    pub fn limited_to_tiers<S: AsRef<str>>(&self, tier_ids: &[S]) -> BadgeDefinition {
        let mut limited = self.clone();
        if let Some(tiers) = limited.tiers.as_mut() {
            tiers.retain(|t| tier_ids.iter().any(|id| id.as_ref() == t.tier_id));
        }
        limited
    }
}

/// Record of a tier reached by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct AchievedTier {
    pub tier_id: String,
    pub completed_at: DateTime<Utc>,
}

/// Outbound grant, consumed by an external publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct BadgeGrant {
    /// Whole badge if untiered, otherwise limited to the new tiers
    pub badge_granted: BadgeDefinition,
    pub user_address: String,
}

impl BadgeGrant {
    /// Grant for an untiered badge.
    pub fn whole(definition: &BadgeDefinition, user_address: impl Into<String>) -> Self {
        Self {
            badge_granted: definition.clone(),
            user_address: user_address.into(),
        }
    }

    /// Grant announcing only the given tiers.
    pub fn tiers(
        definition: &BadgeDefinition,
        tiers: &[Tier],
        user_address: impl Into<String>,
    ) -> Self {
        let ids: Vec<&str> = tiers.iter().map(|t| t.tier_id.as_str()).collect();
        Self {
            badge_granted: definition.limited_to_tiers(&ids),
            user_address: user_address.into(),
        }
    }

    /// Ids of the tiers this grant announces.
    pub fn tier_ids(&self) -> Vec<&str> {
        self.badge_granted
            .tiers()
            .iter()
            .map(|t| t.tier_id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(id: &str, steps: u32) -> Tier {
        Tier {
            tier_id: id.to_string(),
            tier_name: id.to_string(),
            criteria: Criteria::steps(steps),
            assets: BadgeAssets::default(),
        }
    }

    fn tiered() -> BadgeDefinition {
        BadgeDefinition {
            id: BadgeId::Traveler,
            name: "Traveler".to_string(),
            description: "Visit scenes".to_string(),
            category: BadgeCategory::Explorer,
            criteria: Criteria::steps(10),
            tiers: Some(vec![tier("a", 1), tier("b", 5), tier("c", 10)]),
            assets: BadgeAssets::default(),
        }
    }

    #[test]
    fn test_badge_id_roundtrip() {
        for id in BadgeId::ALL {
            assert_eq!(id.as_str().parse::<BadgeId>().unwrap(), id);
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
        }
        assert!(matches!(
            "no-such-badge".parse::<BadgeId>(),
            Err(CatalogError::UnknownBadge(_))
        ));
    }

    #[test]
    fn test_limited_to_tiers() {
        let def = tiered();
        let limited = def.limited_to_tiers(&["b"]);
        assert_eq!(limited.tiers().len(), 1);
        assert_eq!(limited.tiers()[0].tier_id, "b");
        assert_eq!(def.tiers().len(), 3);
    }

    #[test]
    fn test_required_steps() {
        let mut def = tiered();
        assert_eq!(def.required_steps(), 10);
        def.tiers = None;
        def.criteria = Criteria::steps(1);
        assert!(!def.is_tiered());
        assert_eq!(def.required_steps(), 1);
    }

    #[test]
    fn test_grant_tier_ids() {
        let def = tiered();
        let grant = BadgeGrant::tiers(&def, &def.tiers()[1..], "0xabc");
        assert_eq!(grant.tier_ids(), vec!["b", "c"]);
        assert_eq!(grant.user_address, "0xabc");
    }
}
