//! The `EndlessSound` facade.
//!
//! Single entry point for the host player: URI resolution, background
//! caching, replay accounting, eviction, stats, and change observation all
//! hang off this type. Every method is safe to call from the playback path;
//! download failures degrade to network streaming instead of surfacing.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, instrument, warn};

use sound_runtime::events::{CacheEvent, EventBus};
use sound_store::{now_ms, CacheTier, CachedTrack, ReplaySession, TrackCacheStore};

use crate::blob::BlobStore;
use crate::config::EndlessSoundConfig;
use crate::download::{DownloadCoordinator, DownloadOutcome};
use crate::error::{CacheError, Result};
use crate::eviction::{CleanupReport, EvictionPolicy, SharedConfig};
use crate::replay::is_valid_replay;
use crate::stats::{CacheSummary, StatsRecorder};
use crate::traits::{BaseUrlResolver, StreamingHttpClient, TokenProvider};

pub struct EndlessSound {
    store: Arc<dyn TrackCacheStore>,
    stats: Arc<StatsRecorder>,
    eviction: Arc<EvictionPolicy>,
    downloads: Arc<DownloadCoordinator>,
    base_urls: Arc<dyn BaseUrlResolver>,
    config: SharedConfig,
    events: EventBus,
    cached_hashes: watch::Receiver<Vec<String>>,
}

impl EndlessSound {
    /// Builds the cache: validates config, migrates the metadata store,
    /// creates the blob directory, and starts the hash-set publisher.
    pub async fn new(
        config: EndlessSoundConfig,
        store: Arc<dyn TrackCacheStore>,
        cache_dir: impl Into<PathBuf>,
        http: Arc<dyn StreamingHttpClient>,
        tokens: Arc<dyn TokenProvider>,
        base_urls: Arc<dyn BaseUrlResolver>,
    ) -> Result<Self> {
        config.validate().map_err(CacheError::Config)?;
        store.initialize().await?;
        let blobs = Arc::new(BlobStore::open(cache_dir).await?);

        let config: SharedConfig = Arc::new(RwLock::new(config));
        let events = EventBus::default();
        let stats = Arc::new(StatsRecorder::new(store.clone()));
        let eviction = Arc::new(EvictionPolicy::new(
            store.clone(),
            blobs.clone(),
            config.clone(),
            events.clone(),
        ));
        let downloads = Arc::new(DownloadCoordinator::new(
            store.clone(),
            blobs,
            http,
            tokens,
            stats.clone(),
            eviction.clone(),
            config.clone(),
            events.clone(),
        ));

        let initial_hashes = store.valid_track_hashes(now_ms()).await?;
        let (hashes_tx, cached_hashes) = watch::channel(initial_hashes);
        Self::spawn_hash_publisher(store.clone(), events.subscribe(), hashes_tx);

        info!("EndlessSound cache ready");
        Ok(Self {
            store,
            stats,
            eviction,
            downloads,
            base_urls,
            config,
            events,
            cached_hashes,
        })
    }

    /// Recomputes the valid-hash set after every cache mutation and pushes
    /// it to watchers. Exits when the bus closes or all watchers are gone.
    fn spawn_hash_publisher(
        store: Arc<dyn TrackCacheStore>,
        mut events: broadcast::Receiver<CacheEvent>,
        hashes_tx: watch::Sender<Vec<String>>,
    ) {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        match store.valid_track_hashes(now_ms()).await {
                            Ok(hashes) => {
                                if hashes_tx.send(hashes).is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                warn!(error = %err, "Failed to refresh cached hash set")
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Playback URI for a track: `file://` when cached, the remote streaming
    /// URL otherwise. See [`DownloadCoordinator::get_track_uri`].
    pub async fn get_track_uri(&self, track_hash: &str, original_path: &str) -> Result<String> {
        let base_url = self.base_urls.base_url().await;
        self.downloads
            .get_track_uri(track_hash, original_path, &base_url)
            .await
    }

    /// Whether the track is cached with a valid, intact blob.
    pub async fn is_cached(&self, track_hash: &str) -> Result<bool> {
        self.downloads.is_cached(track_hash).await
    }

    /// Metadata record for a track, expired or not.
    pub async fn get_cached_track(&self, track_hash: &str) -> Result<Option<CachedTrack>> {
        Ok(self.store.get_track(track_hash).await?)
    }

    /// Starts a background download for the track. Never fails: errors are
    /// logged and reported as [`DownloadOutcome::Failed`], because the
    /// caller keeps streaming from the network either way.
    #[instrument(skip(self, original_path))]
    pub async fn start_caching(&self, track_hash: &str, original_path: &str) -> DownloadOutcome {
        let base_url = self.base_urls.base_url().await;
        match self
            .downloads
            .start_caching(track_hash, original_path, &base_url)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(track_hash, error = %err, "Caching failed, playback continues from network");
                DownloadOutcome::Failed
            }
        }
    }

    /// Cancels an in-flight download for the track, if any.
    pub async fn cancel_caching(&self, track_hash: &str) -> bool {
        self.downloads.cancel(track_hash).await
    }

    /// Records a playback session and applies its replay consequences.
    ///
    /// Every session is logged, valid or not. A valid replay on a cached
    /// track bumps the replay count and slides the expiry forward from now,
    /// on the upgraded tier's TTL when a ladder threshold was crossed and on
    /// the current tier's TTL otherwise. Tiers never move down.
    #[instrument(skip(self))]
    pub async fn record_replay_session(
        &self,
        track_hash: &str,
        start_position_sec: u32,
        listened_duration_sec: u32,
    ) -> Result<()> {
        let valid = is_valid_replay(start_position_sec, listened_duration_sec);
        let now = now_ms();
        self.store
            .insert_session(&ReplaySession {
                id: 0,
                track_hash: track_hash.to_string(),
                start_position_sec,
                listened_duration_sec,
                timestamp: now,
                was_valid_replay: valid,
            })
            .await?;
        if !valid {
            debug!(track_hash, start_position_sec, listened_duration_sec, "Session logged, not a valid replay");
            return Ok(());
        }

        let Some(cached) = self.store.get_track(track_hash).await? else {
            debug!(track_hash, "Valid replay for uncached track, session logged only");
            return Ok(());
        };

        let new_count = cached.replay_count + 1;
        let ladder_tier = CacheTier::for_replay_count(new_count);
        let upgraded = ladder_tier > cached.tier;
        let tier = if upgraded { ladder_tier } else { cached.tier };
        self.store
            .apply_replay(track_hash, tier, now + tier.ttl_ms())
            .await?;

        if upgraded {
            info!(track_hash, tier = %tier, replay_count = new_count, "Tier upgraded");
        } else {
            debug!(track_hash, tier = %tier, replay_count = new_count, "Replay recorded, expiry extended");
        }
        let _ = self.events.emit(CacheEvent::ReplayRecorded {
            track_hash: track_hash.to_string(),
            tier: tier.as_str().to_string(),
            replay_count: new_count,
            upgraded,
        });
        Ok(())
    }

    /// All unexpired cached tracks.
    pub async fn get_valid_cached_tracks(&self) -> Result<Vec<CachedTrack>> {
        Ok(self.store.valid_tracks(now_ms()).await?)
    }

    /// Live view of the valid cached hash set. The receiver updates after
    /// every cache mutation (download, replay, eviction, clear).
    pub fn observe_cached_track_hashes(&self) -> watch::Receiver<Vec<String>> {
        self.cached_hashes.clone()
    }

    /// Subscribes to cache change events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Current contents and hit-rate snapshot.
    pub async fn get_cache_stats(&self) -> Result<CacheSummary> {
        self.stats.summary(now_ms()).await
    }

    /// Explicit cleanup pass (expired sweep, LRU shrink, session prune).
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        self.eviction.cleanup().await
    }

    /// Evicts one track immediately, regardless of tier.
    pub async fn evict_track(&self, track_hash: &str) -> Result<bool> {
        self.eviction.evict_track(track_hash).await
    }

    /// Empties the cache entirely. Returns the number of tracks removed.
    pub async fn clear_all(&self) -> Result<u64> {
        self.eviction.clear_all().await
    }

    /// Swaps the configuration; new values apply from the next operation.
    pub async fn update_config(&self, config: EndlessSoundConfig) -> Result<()> {
        config.validate().map_err(CacheError::Config)?;
        *self.config.write().await = config;
        debug!("Configuration updated");
        Ok(())
    }

    pub async fn get_config(&self) -> EndlessSoundConfig {
        self.config.read().await.clone()
    }
}
