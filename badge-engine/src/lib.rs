//! Badge Engine - event-driven badge progression
//!
//! Runtime half of the badge service. Domain events are routed to one
//! observer per badge; observers update per-(user, badge) progress through
//! the shared tier rules in `badge-core`. Historical data enters through the
//! backfill merger, which never regresses what live events recorded.
//!
//! # Architecture
//!
//! ```text
//!   DomainEvent                                   backfill payload
//!        │                                               │
//! ┌──────▼─────────┐  get_many / save  ┌──────────────┐  │
//! │ EventDispatcher├──────────────────►│ProgressStore │◄─┤
//! └──────┬─────────┘                   └──────────────┘  │
//!        │ join_all                                ┌─────▼──────────┐
//! ┌──────▼─────────┐  EphemeralCache               │ BackfillMerger │
//! │ BadgeObserver  ├─ ItemLookup                   └─────┬──────────┘
//! └──────┬─────────┘                                     │
//!        └─────────────► badge_core::tiers ◄─────────────┘
//! ```
//!
//! [`BadgeEngine`] wires everything together and serializes work on the
//! same (user, badge) row through [`KeyLocks`].

pub mod backfill;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod locks;
pub mod lookup;
pub mod observers;
pub mod store;

// Re-export main types
pub use backfill::BackfillMerger;
pub use cache::{CacheStats, EphemeralCache, InMemoryCache};
pub use config::{CacheConfig, DispatchConfig, EngineConfig, ObserverConfig};
pub use dispatcher::{DispatchStats, DispatchStatsSnapshot, DispatcherBuilder, EventDispatcher};
pub use engine::{BadgeEngine, BadgeSummary, NextTier, UserBadges};
pub use error::{
    BackfillError, CacheError, DispatchError, EngineError, LookupError, ObserverError, Result,
    StoreError,
};
pub use locks::{KeyGuards, KeyLocks};
pub use lookup::{ItemLookup, ItemMetadata, Rarity, StaticItemLookup};
pub use observers::{
    standard_observers, BadgeObserver, ObserverDeps, ObserverOutcome, ObserverRegistry,
};
pub use store::{InMemoryProgressStore, ProgressStore};
