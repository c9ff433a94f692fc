//! Badge Core - catalog, progress model and tier evaluation
//!
//! Foundation types shared by the badge progression engine:
//!
//! - **Catalog**: immutable registry of badge definitions, loaded once
//! - **Progress**: per-(user, badge) record of accumulated evidence
//! - **Events**: normalized domain events produced by an external parser
//! - **Tiers**: shared rules deciding which tiers are crossed and when a
//!   badge is complete, for both the live and the backfill path
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   Arc<BadgeDefinition>   ┌──────────────────┐
//! │ BadgeCatalog │─────────────────────────►│  tiers::apply_*  │
//! └──────────────┘                          └────────┬─────────┘
//!                                                    │ mutates
//!                                           ┌────────▼─────────┐
//!                                           │   UserProgress   │
//!                                           └──────────────────┘
//! ```

pub mod catalog;
pub mod error;
pub mod event;
pub mod progress;
pub mod tiers;
pub mod types;

// Re-export main types
pub use catalog::BadgeCatalog;
pub use error::{CatalogError, TierError, ValidationError};
pub use event::{DomainEvent, EventKey, EventSubType, EventType};
pub use progress::{
    normalize_address, validate_address, Evidence, EvidenceItem, Progress, ProgressKey,
    UserProgress,
};
pub use types::*;
