//! Configuration for the badge engine.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::EngineError;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Observer tuning
    #[serde(default)]
    pub observers: ObserverConfig,
    /// Ephemeral cache settings
    #[serde(default)]
    pub cache: CacheConfig,
    /// Dispatcher settings
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl EngineConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Read and parse a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&raw).map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Observer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Only one emote per session counts inside this window (seconds)
    pub emote_window_secs: u64,
    /// Minimum stay in a scene before it counts as visited (seconds)
    pub min_scene_stay_secs: u64,
    /// Equipped items of legendary-or-rarer needed for Legendary Look
    pub legendary_look_min_items: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            emote_window_secs: 60,
            min_scene_stay_secs: 60,
            legendary_look_min_items: 3,
        }
    }
}

impl ObserverConfig {
    pub fn emote_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.emote_window_secs as i64)
    }

    pub fn min_scene_stay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_scene_stay_secs as i64)
    }
}

/// Ephemeral cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime (seconds)
    pub ttl_secs: u64,
    /// Maximum number of entries before eviction
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600, // 1 hour
            max_entries: 100_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Serialize updates per (user, badge) key
    pub serialize_per_key: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            serialize_per_key: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.observers.emote_window_secs, 60);
        assert_eq!(config.observers.min_scene_stay_secs, 60);
        assert_eq!(config.observers.legendary_look_min_items, 3);
        assert!(config.dispatch.serialize_per_key);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = EngineConfig::default();
        config.cache.max_entries = 10;
        let yaml = config.to_yaml().unwrap();
        let parsed = EngineConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let parsed = EngineConfig::from_yaml("observers:\n  emote_window_secs: 30\n").unwrap();
        assert_eq!(parsed.observers.emote_window_secs, 30);
        assert_eq!(parsed.observers.min_scene_stay_secs, 60);
        assert_eq!(parsed.cache.ttl_secs, 3600);
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::from_file("/nonexistent/badges.yaml").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
