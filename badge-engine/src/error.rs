//! Error types for the badge engine.

use badge_core::{BadgeId, CatalogError, TierError, ValidationError};

/// Progress store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend could not be reached or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Row or snapshot could not be (de)serialized
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Ephemeral cache failures. Callers treat these as cache misses.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Item lookup failures.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Lookup failed: {0}")]
    RequestFailed(String),
}

/// Failure inside a single observer. Isolated by the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// Event metadata did not match what the observer expects
    #[error("Invalid event: {0}")]
    Validation(#[from] ValidationError),

    /// Badge missing from the injected catalog
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// External item lookup failed
    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Saving the updated row failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Shared-infrastructure failure aborting a whole dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The batched progress fetch failed
    #[error("Progress fetch failed: {0}")]
    ProgressFetch(#[source] StoreError),
}

/// Backfill merge failures. No partial mutation happens on any of these.
#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    /// Badge id is unknown to the catalog or has no merge function
    #[error("Unknown badge: {0}")]
    UnknownBadge(String),

    /// Payload shape or values are invalid
    #[error("Invalid payload for {badge_id}: {source}")]
    InvalidPayload {
        badge_id: BadgeId,
        #[source]
        source: ValidationError,
    },

    /// A crossed tier has no dated item at its threshold
    #[error("Tier evaluation failed: {0}")]
    Tier(#[from] TierError),

    /// Current row belongs to another user or badge
    #[error("Progress row mismatch: {0}")]
    RowMismatch(String),

    /// Merged row failed structural validation
    #[error("Merged progress invalid: {0}")]
    InvalidProgress(#[source] ValidationError),
}

impl From<CatalogError> for BackfillError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::UnknownBadge(id) => BackfillError::UnknownBadge(id),
            other => BackfillError::UnknownBadge(other.to_string()),
        }
    }
}

/// Errors surfaced by the engine facade.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Backfill error: {0}")]
    Backfill(#[from] BackfillError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
