//! Badge catalog - immutable registry of badge definitions.
//!
//! Built once at startup and shared as `Arc<BadgeCatalog>` with every
//! component that needs definitions. There is no global instance.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::CatalogError;
use crate::types::{BadgeAssets, BadgeCategory, BadgeDefinition, BadgeId, Criteria, Tier};

/// Registry mapping badge id to its definition.
#[derive(Debug, Clone, Default)]
pub struct BadgeCatalog {
    definitions: BTreeMap<BadgeId, Arc<BadgeDefinition>>,
}

impl BadgeCatalog {
    /// Build a catalog, validating every definition.
    pub fn new(definitions: impl IntoIterator<Item = BadgeDefinition>) -> Result<Self, CatalogError> {
        let mut map = BTreeMap::new();
        for definition in definitions {
            validate_definition(&definition)?;
            let id = definition.id;
            if map.insert(id, Arc::new(definition)).is_some() {
                return Err(CatalogError::DuplicateBadge(id));
            }
        }
        debug!(badges = map.len(), "Badge catalog built");
        Ok(Self { definitions: map })
    }

    /// Catalog with every badge the platform ships.
    pub fn standard() -> Self {
        let definitions = standard_definitions()
            .into_iter()
            .map(|d| (d.id, Arc::new(d)))
            .collect();
        Self { definitions }
    }

    /// Load definitions from a JSON array.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let definitions: Vec<BadgeDefinition> =
            serde_json::from_str(json).map_err(|e| CatalogError::Parse(e.to_string()))?;
        Self::new(definitions)
    }

    /// Definition for a badge, if present.
    pub fn get(&self, badge_id: BadgeId) -> Option<Arc<BadgeDefinition>> {
        self.definitions.get(&badge_id).cloned()
    }

    /// Definition for a badge, or an error naming it.
    pub fn definition(&self, badge_id: BadgeId) -> Result<Arc<BadgeDefinition>, CatalogError> {
        self.get(badge_id)
            .ok_or_else(|| CatalogError::UnknownBadge(badge_id.to_string()))
    }

    pub fn contains(&self, badge_id: BadgeId) -> bool {
        self.definitions.contains_key(&badge_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BadgeDefinition>> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

fn validate_definition(definition: &BadgeDefinition) -> Result<(), CatalogError> {
    let invalid = |reason: &str| CatalogError::InvalidDefinition {
        badge_id: definition.id,
        reason: reason.to_string(),
    };

    if definition.criteria.steps == 0 {
        return Err(invalid("criteria steps must be positive"));
    }

    let tiers = definition.tiers();
    if let Some(tiers) = &definition.tiers {
        if tiers.is_empty() {
            return Err(invalid("tier list is present but empty"));
        }
    }
    if tiers.windows(2).any(|w| w[0].criteria.steps >= w[1].criteria.steps) {
        return Err(invalid("tiers must be strictly ascending"));
    }
    if tiers.iter().any(|t| t.criteria.steps == 0) {
        return Err(invalid("tier steps must be positive"));
    }
    for (i, tier) in tiers.iter().enumerate() {
        if tiers[..i].iter().any(|t| t.tier_id == tier.tier_id) {
            return Err(invalid("duplicate tier id"));
        }
    }
    if let Some(last) = tiers.last() {
        if last.criteria.steps != definition.criteria.steps {
            return Err(invalid("criteria must equal the last tier's steps"));
        }
    }
    Ok(())
}

const TIER_NAMES: [&str; 6] = ["Starter", "Bronze", "Silver", "Gold", "Platinum", "Diamond"];

fn asset(badge: BadgeId, variant: &str) -> BadgeAssets {
    BadgeAssets {
        image_2d: Some(format!("https://assets.decentraland.org/badges/{}/{}/2d/normal.png", badge, variant)),
        image_3d: Some(format!("https://assets.decentraland.org/badges/{}/{}/3d/basecolor.png", badge, variant)),
    }
}

fn single(id: BadgeId, name: &str, description: &str, category: BadgeCategory, steps: u32) -> BadgeDefinition {
    BadgeDefinition {
        id,
        name: name.to_string(),
        description: description.to_string(),
        category,
        criteria: Criteria::steps(steps),
        tiers: None,
        assets: asset(id, "default"),
    }
}

fn tiered(
    id: BadgeId,
    name: &str,
    description: &str,
    category: BadgeCategory,
    thresholds: [u32; 6],
) -> BadgeDefinition {
    let tiers: Vec<Tier> = TIER_NAMES
        .iter()
        .zip(thresholds)
        .map(|(tier_name, steps)| {
            let slug = tier_name.to_ascii_lowercase();
            Tier {
                tier_id: format!("{}-{}", id, slug),
                tier_name: tier_name.to_string(),
                criteria: Criteria::steps(steps),
                assets: asset(id, &slug),
            }
        })
        .collect();
    BadgeDefinition {
        id,
        name: name.to_string(),
        description: description.to_string(),
        category,
        criteria: Criteria::steps(thresholds[5]),
        tiers: Some(tiers),
        assets: asset(id, "default"),
    }
}

/// Every badge the platform ships, with production thresholds.
pub fn standard_definitions() -> Vec<BadgeDefinition> {
    use BadgeCategory::*;
    use BadgeId::*;

    vec![
        single(DecentralandCitizen, "Decentraland Citizen", "Landed in Genesis City for the first time.", Explorer, 1),
        tiered(Traveler, "Traveler", "Spent at least a minute in distinct scenes.", Explorer, [10, 50, 250, 500, 1000, 2500]),
        tiered(Emotionista, "Emotionista", "Expressed yourself with emotes.", Socializer, [100, 500, 2500, 10_000, 25_000, 50_000]),
        tiered(Fashionista, "Fashionista", "Bought wearables on the marketplace.", Collector, [1, 10, 25, 50, 100, 250]),
        tiered(WearableDesigner, "Wearable Designer", "Published wearables that passed curation.", Creator, [1, 5, 10, 50, 100, 250]),
        tiered(EmoteCreator, "Emote Creator", "Published emotes that passed curation.", Creator, [1, 5, 10, 50, 100, 250]),
        tiered(SocialButterfly, "Social Butterfly", "Made friends with other residents.", Socializer, [1, 10, 50, 100, 250, 500]),
        tiered(EventEnthusiast, "Event Enthusiast", "Attended community events.", Socializer, [1, 5, 25, 50, 100, 250]),
        single(LandArchitect, "Land Architect", "Deployed your first scene to Genesis City.", Builder, 1),
        single(OpenForBusiness, "Open for Business", "Set up a store and published an item.", Creator, 2),
        single(LegendaryLook, "Legendary Look", "Wore at least three legendary-or-rarer items at once.", Collector, 1),
    ]
}
