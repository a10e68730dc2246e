//! # Sound Cache
//!
//! Adaptive, replay-aware local cache for streamed audio tracks.
//!
//! A playback request asks [`EndlessSound`] for a URI: a hit serves the local
//! blob, a miss returns the remote streaming URL while the track is fetched
//! in the background. How long a track stays cached depends on how the user
//! actually re-listens to it: each valid replay climbs (or refreshes) a
//! tiered TTL ladder, and eviction reclaims space expired-first, then by LRU
//! with protection for high-tier tracks.
//!
//! No failure in this crate is fatal to playback; every error path degrades
//! to "serve from network".

pub mod blob;
pub mod config;
pub mod download;
pub mod error;
pub mod eviction;
pub mod http;
pub mod manager;
pub mod replay;
pub mod stats;
pub mod traits;

pub use blob::BlobStore;
pub use config::EndlessSoundConfig;
pub use download::{DownloadCoordinator, DownloadOutcome};
pub use error::{CacheError, Result};
pub use eviction::{CleanupReport, EvictionPolicy};
pub use http::ReqwestStreamClient;
pub use manager::EndlessSound;
pub use stats::{CacheSummary, StatsRecorder};
pub use traits::{BaseUrlResolver, StreamingHttpClient, TokenProvider};

pub use sound_runtime::events::{CacheEvent, EventBus, EventStream, EvictionReason};
pub use sound_store::{CacheTier, CachedTrack, ReplaySession};
