//! Background download coordination.
//!
//! One download per track: concurrent requests for the same hash collapse
//! into the existing in-flight transfer. A download is attempted once, with
//! no retry; the caller already holds a remote URL and keeps streaming from
//! the network regardless of the outcome here.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use sound_runtime::events::{CacheEvent, EventBus, EvictionReason};
use sound_store::{now_ms, CacheTier, CachedTrack, TrackCacheStore};

use crate::blob::BlobStore;
use crate::error::{CacheError, Result};
use crate::eviction::{EvictionPolicy, SharedConfig};
use crate::stats::StatsRecorder;
use crate::traits::{StreamingHttpClient, TokenProvider};

/// Result of a caching attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// A valid blob already exists; nothing to do.
    AlreadyCached,
    /// Another task is downloading this track right now.
    AlreadyInFlight,
    /// The track was downloaded and admitted to the cache.
    Downloaded { bytes: u64 },
    /// The attempt failed; the track stays uncached and playback continues
    /// from the network.
    Failed,
}

/// Builds the remote streaming URL for a track.
///
/// `base_url` must end with a slash; the original path is URL-encoded into
/// the `filepath` query parameter.
pub fn remote_track_url(base_url: &str, track_hash: &str, original_path: &str) -> String {
    format!(
        "{base_url}file/{track_hash}/legacy?filepath={}",
        urlencoding::encode(original_path)
    )
}

pub struct DownloadCoordinator {
    store: Arc<dyn TrackCacheStore>,
    blobs: Arc<BlobStore>,
    http: Arc<dyn StreamingHttpClient>,
    tokens: Arc<dyn TokenProvider>,
    stats: Arc<StatsRecorder>,
    eviction: Arc<EvictionPolicy>,
    config: SharedConfig,
    events: EventBus,
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

/// Removes the in-flight entry when the download future completes or is
/// dropped mid-way.
struct InFlightGuard<'a> {
    registry: &'a Mutex<HashMap<String, CancellationToken>>,
    track_hash: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.registry.lock().remove(self.track_hash);
    }
}

impl DownloadCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn TrackCacheStore>,
        blobs: Arc<BlobStore>,
        http: Arc<dyn StreamingHttpClient>,
        tokens: Arc<dyn TokenProvider>,
        stats: Arc<StatsRecorder>,
        eviction: Arc<EvictionPolicy>,
        config: SharedConfig,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            blobs,
            http,
            tokens,
            stats,
            eviction,
            config,
            events,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the playback URI for a track.
    ///
    /// A valid record with an intact blob is a hit: `last_accessed_at` is
    /// refreshed and a `file://` URI returned. A record whose blob has gone
    /// missing is deleted on the spot (self-healing) and the request falls
    /// through to a miss, which returns the remote streaming URL.
    #[instrument(skip(self, base_url, original_path))]
    pub async fn get_track_uri(
        &self,
        track_hash: &str,
        original_path: &str,
        base_url: &str,
    ) -> Result<String> {
        let now = now_ms();
        if let Some(record) = self.store.get_valid_track(track_hash, now).await? {
            if self.blobs.exists(Path::new(&record.blob_path)).await {
                self.store.touch_last_accessed(track_hash, now).await?;
                self.stats.record_hit(record.file_size_bytes).await?;
                debug!(track_hash, "Cache hit");
                return Ok(format!("file://{}", record.blob_path));
            }
            warn!(track_hash, blob_path = %record.blob_path, "Blob missing, self-healing record");
            self.store.delete_track(track_hash).await?;
            let _ = self.events.emit(CacheEvent::TrackEvicted {
                track_hash: track_hash.to_string(),
                reason: EvictionReason::SelfHealed,
            });
        }

        self.stats.record_miss().await?;
        debug!(track_hash, "Cache miss, serving remote URL");
        Ok(remote_track_url(base_url, track_hash, original_path))
    }

    /// True when the track has a valid metadata record and an intact blob.
    pub async fn is_cached(&self, track_hash: &str) -> Result<bool> {
        match self.store.get_valid_track(track_hash, now_ms()).await? {
            Some(record) => Ok(self.blobs.exists(Path::new(&record.blob_path)).await),
            None => Ok(false),
        }
    }

    /// Downloads a track into the cache unless it is already there or
    /// already being fetched. At most one transfer per hash is ever active.
    #[instrument(skip(self, base_url, original_path))]
    pub async fn start_caching(
        &self,
        track_hash: &str,
        original_path: &str,
        base_url: &str,
    ) -> Result<DownloadOutcome> {
        if self.is_cached(track_hash).await? {
            debug!(track_hash, "Already cached, skipping download");
            return Ok(DownloadOutcome::AlreadyCached);
        }

        let cancel = {
            let mut registry = self.in_flight.lock();
            if registry.contains_key(track_hash) {
                debug!(track_hash, "Download already in flight");
                return Ok(DownloadOutcome::AlreadyInFlight);
            }
            let token = CancellationToken::new();
            registry.insert(track_hash.to_string(), token.clone());
            token
        };
        let _guard = InFlightGuard {
            registry: &self.in_flight,
            track_hash,
        };

        let bytes = self
            .download_and_admit(track_hash, original_path, base_url, &cancel)
            .await?;
        let _ = self.events.emit(CacheEvent::TrackCached {
            track_hash: track_hash.to_string(),
            file_size_bytes: bytes,
        });
        Ok(DownloadOutcome::Downloaded { bytes })
    }

    /// Cancels an in-flight download. Returns false when none is active.
    pub async fn cancel(&self, track_hash: &str) -> bool {
        let token = self.in_flight.lock().get(track_hash).cloned();
        match token {
            Some(token) => {
                token.cancel();
                debug!(track_hash, "Download cancellation requested");
                true
            }
            None => false,
        }
    }

    async fn download_and_admit(
        &self,
        track_hash: &str,
        original_path: &str,
        base_url: &str,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        self.maybe_cleanup_before_download().await?;

        let url = remote_track_url(base_url, track_hash, original_path);
        let token = self.tokens.access_token().await;
        debug!(track_hash, "Starting download");
        let mut reader = self.http.get_stream(&url, token.as_deref()).await?;

        let written = tokio::select! {
            _ = cancel.cancelled() => Err(CacheError::Cancelled(track_hash.to_string())),
            result = self.blobs.write(track_hash, &mut reader) => result,
        };
        let (blob_path, bytes) = match written {
            Ok(written) => written,
            Err(err) => {
                // The blob writer cleans up after its own failures; a
                // cancelled select drops it mid-write, so sweep here too.
                self.blobs.remove_partial(track_hash).await;
                return Err(err);
            }
        };

        let now = now_ms();
        let tier = CacheTier::Initial;
        self.store
            .upsert_track(&CachedTrack {
                track_hash: track_hash.to_string(),
                original_path: original_path.to_string(),
                blob_path: blob_path.display().to_string(),
                cached_at: now,
                expires_at: now + tier.ttl_ms(),
                tier,
                replay_count: 0,
                file_size_bytes: bytes,
                last_accessed_at: now,
            })
            .await?;
        self.stats.record_download(bytes).await?;
        info!(track_hash, bytes, "Track cached");
        Ok(bytes)
    }

    /// Runs a cleanup pass when auto-cleanup is on and usage has crossed the
    /// configured threshold, so the incoming blob has room to land.
    async fn maybe_cleanup_before_download(&self) -> Result<()> {
        let (enabled, trigger_bytes) = {
            let cfg = self.config.read().await;
            (
                cfg.enable_auto_cleanup,
                (cfg.max_cache_size_bytes as f64 * cfg.cleanup_threshold_percent) as u64,
            )
        };
        if !enabled {
            return Ok(());
        }
        let current = self.store.total_size_bytes().await?;
        if current > trigger_bytes {
            debug!(current, trigger_bytes, "Cache over threshold, cleaning before download");
            self.eviction.cleanup().await?;
        }
        Ok(())
    }
}
