//! Single-milestone badges: one qualifying event completes the badge.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use badge_core::{
    validate_address, BadgeCatalog, BadgeDefinition, BadgeId, CatalogError, DomainEvent,
    EventKey, EventSubType, EventType, UserProgress,
};

use super::{complete_milestone, subject_from, BadgeObserver, ObserverOutcome};
use crate::error::ObserverError;

const MOVE_TO_PARCEL: [EventKey; 1] = [EventKey::new(EventType::Client, EventSubType::MoveToParcel)];
const SCENE_DEPLOYED: [EventKey; 1] = [EventKey::new(EventType::Catalyst, EventSubType::SceneDeployed)];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveMetadata {
    user_address: String,
}

/// Decentraland Citizen: the first move inside Genesis City.
pub struct CitizenObserver {
    definition: Arc<BadgeDefinition>,
}

impl CitizenObserver {
    pub fn new(catalog: &BadgeCatalog) -> Result<Self, CatalogError> {
        Ok(Self {
            definition: catalog.definition(BadgeId::DecentralandCitizen)?,
        })
    }
}

#[async_trait]
impl BadgeObserver for CitizenObserver {
    fn badge_id(&self) -> BadgeId {
        BadgeId::DecentralandCitizen
    }

    fn events(&self) -> &[EventKey] {
        &MOVE_TO_PARCEL
    }

    fn user_address(&self, event: &DomainEvent) -> Option<String> {
        subject_from(self.badge_id(), event, |m: &MoveMetadata| {
            Some(m.user_address.as_str())
        })
    }

    async fn handle(
        &self,
        event: &DomainEvent,
        current: Option<&UserProgress>,
    ) -> Result<Option<ObserverOutcome>, ObserverError> {
        let metadata: MoveMetadata = event.metadata()?;
        let user = validate_address(&metadata.user_address)?;
        Ok(complete_milestone(
            &self.definition,
            current,
            &user,
            event.timestamp,
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneDeployedMetadata {
    deployer: String,
    #[serde(default)]
    pointers: Vec<String>,
    /// Deployments to personal worlds do not count
    #[serde(default)]
    is_world: bool,
}

/// Land Architect: the first scene deployed to Genesis City.
pub struct LandArchitectObserver {
    definition: Arc<BadgeDefinition>,
}

impl LandArchitectObserver {
    pub fn new(catalog: &BadgeCatalog) -> Result<Self, CatalogError> {
        Ok(Self {
            definition: catalog.definition(BadgeId::LandArchitect)?,
        })
    }
}

#[async_trait]
impl BadgeObserver for LandArchitectObserver {
    fn badge_id(&self) -> BadgeId {
        BadgeId::LandArchitect
    }

    fn events(&self) -> &[EventKey] {
        &SCENE_DEPLOYED
    }

    fn user_address(&self, event: &DomainEvent) -> Option<String> {
        subject_from(self.badge_id(), event, |m: &SceneDeployedMetadata| {
            Some(m.deployer.as_str())
        })
    }

    async fn handle(
        &self,
        event: &DomainEvent,
        current: Option<&UserProgress>,
    ) -> Result<Option<ObserverOutcome>, ObserverError> {
        let metadata: SceneDeployedMetadata = event.metadata()?;
        if metadata.is_world || metadata.pointers.is_empty() {
            return Ok(None);
        }
        let user = validate_address(&metadata.deployer)?;
        Ok(complete_milestone(
            &self.definition,
            current,
            &user,
            event.timestamp,
        ))
    }
}
