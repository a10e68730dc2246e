//! # Sound Store
//!
//! Persistent metadata store for the EndlessSound cache, backed by SQLite
//! via `sqlx`. Holds three shapes of data:
//!
//! - cached-track records (identity, blob location, tier, TTL, access times)
//! - an append-only replay session log
//! - daily hit/miss/byte counters
//!
//! Each call is transactionally consistent on its own; the store does not
//! provide cross-call transactions. Callers tolerate benign races (a record
//! may vanish between a lookup and a follow-up call).

pub mod db;
pub mod error;
pub mod models;
pub mod repository;

pub use error::{Result, StoreError};
pub use models::{now_ms, CacheTier, CachedTrack, DailyCacheStats, HitMissTotals, ReplaySession};
pub use repository::{SqliteTrackCacheStore, TrackCacheStore};
