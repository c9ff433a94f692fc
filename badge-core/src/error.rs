//! Error types shared across the badge crates.

use crate::types::BadgeId;

/// Malformed inbound data: event metadata, backfill payloads or a
/// progress row that breaks its structural invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Event metadata could not be decoded for the observer
    #[error("Invalid metadata for {event}: {reason}")]
    Metadata { event: String, reason: String },

    /// Backfill payload shape is wrong
    #[error("Invalid payload: {0}")]
    Payload(String),

    /// A single field has an unacceptable value
    #[error("Invalid field `{field}`: {reason}")]
    Field { field: &'static str, reason: String },

    /// Progress row violates an invariant
    #[error("Invalid progress for {badge_id}: {reason}")]
    Progress { badge_id: BadgeId, reason: String },
}

impl ValidationError {
    /// Shorthand for a field error.
    pub fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Field {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised by the tier evaluator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TierError {
    /// A crossed threshold has no dated item backing it
    #[error("No evidence at index {index} for tier {tier_id} of {badge_id}")]
    MissingEvidence {
        badge_id: BadgeId,
        tier_id: String,
        index: usize,
    },
}

/// Errors building or querying the badge catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// Badge id is not part of the catalog
    #[error("Unknown badge: {0}")]
    UnknownBadge(String),

    /// The same badge was defined twice
    #[error("Duplicate badge definition: {0}")]
    DuplicateBadge(BadgeId),

    /// A definition is internally inconsistent
    #[error("Invalid definition for {badge_id}: {reason}")]
    InvalidDefinition { badge_id: BadgeId, reason: String },

    /// Catalog document could not be parsed
    #[error("Catalog parse error: {0}")]
    Parse(String),
}
