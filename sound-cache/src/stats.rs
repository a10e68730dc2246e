//! Hit/miss accounting and cache summaries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sound_store::{CacheTier, TrackCacheStore};

use crate::error::Result;

/// Rolls daily hit/miss/byte counters into the store. Counters are keyed by
/// UTC date and created lazily on first write.
pub struct StatsRecorder {
    store: Arc<dyn TrackCacheStore>,
}

impl StatsRecorder {
    pub fn new(store: Arc<dyn TrackCacheStore>) -> Self {
        Self { store }
    }

    fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    /// A playback request served from the local blob.
    pub async fn record_hit(&self, bytes_served: u64) -> Result<()> {
        self.store.record_hit(&Self::today(), bytes_served).await?;
        Ok(())
    }

    /// A playback request that fell through to the network.
    pub async fn record_miss(&self) -> Result<()> {
        self.store.record_miss(&Self::today()).await?;
        Ok(())
    }

    /// A background download that completed and was admitted to the cache.
    pub async fn record_download(&self, bytes_downloaded: u64) -> Result<()> {
        self.store
            .record_download(&Self::today(), bytes_downloaded)
            .await?;
        Ok(())
    }

    /// Point-in-time snapshot of cache contents and all-time hit rate.
    pub async fn summary(&self, now_ms: i64) -> Result<CacheSummary> {
        let total_tracks = self.store.track_count().await?;
        let total_size_bytes = self.store.total_size_bytes().await?;
        let expired_count = self.store.expired_tracks(now_ms).await?.len() as u64;

        let mut tier_breakdown = HashMap::new();
        for tier in CacheTier::ALL {
            tier_breakdown.insert(tier, self.store.count_by_tier(tier).await?);
        }

        let totals = self.store.hit_miss_totals().await?;
        Ok(CacheSummary {
            total_tracks,
            total_size_bytes,
            tier_breakdown,
            expired_count,
            hit_rate: totals.hit_rate(),
        })
    }
}

/// Snapshot returned by [`StatsRecorder::summary`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    pub total_tracks: u64,
    pub total_size_bytes: u64,
    pub tier_breakdown: HashMap<CacheTier, u64>,
    /// Tracks past their TTL that cleanup has not swept yet.
    pub expired_count: u64,
    /// All-time fraction of requests served locally; 0.0 with no traffic.
    pub hit_rate: f64,
}
