//! Space reclamation.
//!
//! Cleanup runs three phases in order: sweep expired tracks, evict by LRU
//! until usage falls to the configured target, prune stale replay sessions.
//! High-tier tracks (FAVORITE and above) are skipped by the LRU phase unless
//! the space deficit is severe.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use sound_runtime::events::{CacheEvent, EventBus, EvictionReason};
use sound_store::{now_ms, CacheTier, TrackCacheStore};

use crate::blob::BlobStore;
use crate::config::EndlessSoundConfig;
use crate::error::Result;

/// How many LRU candidates a single cleanup pass considers.
const LRU_BATCH_SIZE: u32 = 100;

/// FAVORITE and PERMANENT tracks are only eligible for LRU eviction when the
/// bytes still needed exceed this fraction of current cache usage.
const HIGH_TIER_PROTECTION_THRESHOLD: f64 = 0.5;

/// Replay sessions older than 30 days are pruned on every cleanup.
const SESSION_RETENTION_MS: i64 = 30 * 24 * 60 * 60 * 1000;

pub type SharedConfig = Arc<RwLock<EndlessSoundConfig>>;

/// What a cleanup pass accomplished.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub expired_removed: u64,
    pub lru_evicted: u64,
    pub bytes_freed: u64,
    pub sessions_pruned: u64,
}

pub struct EvictionPolicy {
    store: Arc<dyn TrackCacheStore>,
    blobs: Arc<BlobStore>,
    config: SharedConfig,
    events: EventBus,
}

impl EvictionPolicy {
    pub fn new(
        store: Arc<dyn TrackCacheStore>,
        blobs: Arc<BlobStore>,
        config: SharedConfig,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            blobs,
            config,
            events,
        }
    }

    /// Full cleanup pass. Blob deletion failures are logged and the record
    /// kept, so the entry stays visible to the next pass.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let started = Instant::now();
        let now = now_ms();
        let mut report = CleanupReport::default();

        // Phase 1: expired tracks go regardless of tier.
        for track in self.store.expired_tracks(now).await? {
            if let Err(err) = self.blobs.delete(Path::new(&track.blob_path)).await {
                warn!(track_hash = %track.track_hash, error = %err, "Failed to delete expired blob");
                continue;
            }
            self.store.delete_track(&track.track_hash).await?;
            report.expired_removed += 1;
            report.bytes_freed += track.file_size_bytes;
            let _ = self.events.emit(CacheEvent::TrackEvicted {
                track_hash: track.track_hash,
                reason: EvictionReason::Expired,
            });
        }

        // Phase 2: shrink to the target fraction by least-recently-used.
        let target_bytes = {
            let cfg = self.config.read().await;
            (cfg.max_cache_size_bytes as f64 * cfg.cleanup_target_percent) as u64
        };
        let current_size = self.store.total_size_bytes().await?;
        if current_size > target_bytes {
            let mut size_to_free = current_size - target_bytes;
            for track in self.store.least_recently_used(LRU_BATCH_SIZE).await? {
                if size_to_free == 0 {
                    break;
                }
                if track.tier >= CacheTier::Favorite
                    && (size_to_free as f64)
                        < current_size as f64 * HIGH_TIER_PROTECTION_THRESHOLD
                {
                    debug!(track_hash = %track.track_hash, tier = %track.tier, "Skipping protected track");
                    continue;
                }
                if let Err(err) = self.blobs.delete(Path::new(&track.blob_path)).await {
                    warn!(track_hash = %track.track_hash, error = %err, "Failed to delete blob, skipping");
                    continue;
                }
                self.store.delete_track(&track.track_hash).await?;
                size_to_free = size_to_free.saturating_sub(track.file_size_bytes);
                report.lru_evicted += 1;
                report.bytes_freed += track.file_size_bytes;
                let _ = self.events.emit(CacheEvent::TrackEvicted {
                    track_hash: track.track_hash,
                    reason: EvictionReason::LruPressure,
                });
            }
        }

        // Phase 3: drop replay sessions past retention.
        report.sessions_pruned = self.store.prune_sessions_before(now - SESSION_RETENTION_MS).await?;

        info!(
            expired_removed = report.expired_removed,
            lru_evicted = report.lru_evicted,
            bytes_freed = report.bytes_freed,
            sessions_pruned = report.sessions_pruned,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cleanup finished"
        );
        Ok(report)
    }

    /// Removes a single track immediately, ignoring tier protection.
    /// Returns false when the track was not cached.
    pub async fn evict_track(&self, track_hash: &str) -> Result<bool> {
        let Some(track) = self.store.get_track(track_hash).await? else {
            return Ok(false);
        };
        if let Err(err) = self.blobs.delete(Path::new(&track.blob_path)).await {
            warn!(track_hash, error = %err, "Failed to delete blob during eviction");
        }
        self.store.delete_track(track_hash).await?;
        let _ = self.events.emit(CacheEvent::TrackEvicted {
            track_hash: track_hash.to_string(),
            reason: EvictionReason::Explicit,
        });
        debug!(track_hash, "Track evicted");
        Ok(true)
    }

    /// Empties the cache: every blob, every metadata row, every tier.
    /// Returns the number of tracks removed.
    pub async fn clear_all(&self) -> Result<u64> {
        let tracks = self.store.all_tracks().await?;
        self.blobs.clear().await?;
        let mut removed = 0;
        for track in tracks {
            if self.store.delete_track(&track.track_hash).await? {
                removed += 1;
            }
        }
        let _ = self.events.emit(CacheEvent::CacheCleared {
            tracks_removed: removed,
        });
        info!(tracks_removed = removed, "Cache cleared");
        Ok(removed)
    }
}
