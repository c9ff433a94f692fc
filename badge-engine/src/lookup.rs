//! Item metadata lookup used by the aggregate-rarity observer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::error::LookupError;

/// Item rarity, ordered from most to least common.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
    Exotic,
    Mythic,
    Unique,
}

/// Resolved metadata for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub urn: String,
    /// Base items have no rarity
    pub rarity: Option<Rarity>,
}

/// Resolves a bundle of item urns to their metadata.
///
/// Retries are the implementation's concern; callers treat an error as a
/// failure of the current event.
#[async_trait]
pub trait ItemLookup: Send + Sync {
    async fn resolve_bundle(&self, urns: &[String]) -> Result<Vec<ItemMetadata>, LookupError>;
}

/// Lookup answering from a fixed urn → rarity table.
pub struct StaticItemLookup {
    rarities: HashMap<String, Rarity>,
    available: AtomicBool,
    call_count: AtomicU32,
}

impl StaticItemLookup {
    pub fn new(rarities: impl IntoIterator<Item = (String, Rarity)>) -> Self {
        Self {
            rarities: rarities
                .into_iter()
                .map(|(urn, rarity)| (urn.to_ascii_lowercase(), rarity))
                .collect(),
            available: AtomicBool::new(true),
            call_count: AtomicU32::new(0),
        }
    }

    /// Parse a JSON object of `{ "urn": "rarity" }`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let table: HashMap<String, Rarity> = serde_json::from_str(json)?;
        Ok(Self::new(table))
    }

    /// Set availability.
    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Number of resolve calls made.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for StaticItemLookup {
    fn default() -> Self {
        Self::new(std::iter::empty())
    }
}

#[async_trait]
impl ItemLookup for StaticItemLookup {
    async fn resolve_bundle(&self, urns: &[String]) -> Result<Vec<ItemMetadata>, LookupError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(LookupError::RequestFailed("static lookup disabled".to_string()));
        }
        Ok(urns
            .iter()
            .map(|urn| ItemMetadata {
                urn: urn.clone(),
                rarity: self.rarities.get(&urn.to_ascii_lowercase()).copied(),
            })
            .collect())
    }
}
