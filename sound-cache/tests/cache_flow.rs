//! End-to-end tests for the cache facade: URI resolution, background
//! downloads, replay tiering, eviction, and observation.

use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{Mutex, Notify};

use sound_cache::traits::ByteStream;
use sound_cache::{
    BaseUrlResolver, CacheError, CacheEvent, CacheTier, CachedTrack, DownloadOutcome,
    EndlessSound, EndlessSoundConfig, EvictionReason, Result, StreamingHttpClient,
    TokenProvider,
};
use sound_store::{db, now_ms, SqliteTrackCacheStore, TrackCacheStore};
use tempfile::TempDir;

const BASE_URL: &str = "https://music.example.com/";

struct FixedToken;

#[async_trait]
impl TokenProvider for FixedToken {
    async fn access_token(&self) -> Option<String> {
        Some("test-token".to_string())
    }
}

struct FixedBaseUrl;

#[async_trait]
impl BaseUrlResolver for FixedBaseUrl {
    async fn base_url(&self) -> String {
        BASE_URL.to_string()
    }
}

/// Serves a fixed body per hash-bearing URL and counts requests.
struct FakeRemote {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    requests: AtomicUsize,
    seen_urls: Mutex<Vec<String>>,
}

impl FakeRemote {
    fn new() -> Self {
        Self {
            bodies: Mutex::new(HashMap::new()),
            requests: AtomicUsize::new(0),
            seen_urls: Mutex::new(Vec::new()),
        }
    }

    async fn serve(&self, track_hash: &str, body: &[u8]) {
        self.bodies
            .lock()
            .await
            .insert(track_hash.to_string(), body.to_vec());
    }

    fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamingHttpClient for FakeRemote {
    async fn get_stream(&self, url: &str, _bearer_token: Option<&str>) -> Result<ByteStream> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.seen_urls.lock().await.push(url.to_string());
        let bodies = self.bodies.lock().await;
        let body = bodies
            .iter()
            .find(|(hash, _)| url.contains(hash.as_str()))
            .map(|(_, body)| body.clone())
            .unwrap_or_default();
        Ok(Box::new(std::io::Cursor::new(body)))
    }
}

/// Blocks every download on a gate so tests can hold transfers open.
struct GatedRemote {
    body: Vec<u8>,
    started: Notify,
    gate: Notify,
    requests: AtomicUsize,
}

impl GatedRemote {
    fn new(body: &[u8]) -> Self {
        Self {
            body: body.to_vec(),
            started: Notify::new(),
            gate: Notify::new(),
            requests: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StreamingHttpClient for GatedRemote {
    async fn get_stream(&self, _url: &str, _bearer_token: Option<&str>) -> Result<ByteStream> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.gate.notified().await;
        Ok(Box::new(std::io::Cursor::new(self.body.clone())))
    }
}

/// A body stream that never yields data, for cancellation tests.
struct StalledReader;

impl AsyncRead for StalledReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Pending
    }
}

struct StalledRemote;

#[async_trait]
impl StreamingHttpClient for StalledRemote {
    async fn get_stream(&self, _url: &str, _bearer_token: Option<&str>) -> Result<ByteStream> {
        Ok(Box::new(StalledReader))
    }
}

mock! {
    Remote {}

    #[async_trait]
    impl StreamingHttpClient for Remote {
        #[mockall::concretize]
        async fn get_stream(&self, url: &str, bearer_token: Option<&str>) -> Result<ByteStream>;
    }
}

struct Harness {
    cache: Arc<EndlessSound>,
    store: Arc<SqliteTrackCacheStore>,
    dir: TempDir,
}

impl Harness {
    fn blob_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("blobs")
    }

    /// Seeds a metadata record and a matching blob file directly.
    async fn seed_track(&self, hash: &str, tier: CacheTier, size: usize, expires_at: i64, last_accessed_at: i64) {
        let blob_path = self.blob_dir().join(format!("{hash}.audio"));
        std::fs::write(&blob_path, vec![0u8; size]).unwrap();
        self.store
            .upsert_track(&CachedTrack {
                track_hash: hash.to_string(),
                original_path: format!("/music/{hash}.flac"),
                blob_path: blob_path.display().to_string(),
                cached_at: 0,
                expires_at,
                tier,
                replay_count: tier.min_replays(),
                file_size_bytes: size as u64,
                last_accessed_at,
            })
            .await
            .unwrap();
    }
}

async fn harness_with(
    config: EndlessSoundConfig,
    http: Arc<dyn StreamingHttpClient>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::open_in_memory().await.unwrap();
    let store = Arc::new(SqliteTrackCacheStore::new(pool));
    let cache = EndlessSound::new(
        config,
        store.clone(),
        dir.path().join("blobs"),
        http,
        Arc::new(FixedToken),
        Arc::new(FixedBaseUrl),
    )
    .await
    .unwrap();
    Harness {
        cache: Arc::new(cache),
        store,
        dir,
    }
}

async fn harness(http: Arc<dyn StreamingHttpClient>) -> Harness {
    harness_with(EndlessSoundConfig::default(), http).await
}

#[tokio::test]
async fn miss_returns_encoded_remote_url() {
    let h = harness(Arc::new(FakeRemote::new())).await;

    let uri = h
        .cache
        .get_track_uri("deadbeef", "/Music/Daft Punk/One More Time.flac")
        .await
        .unwrap();
    assert_eq!(
        uri,
        "https://music.example.com/file/deadbeef/legacy?filepath=%2FMusic%2FDaft%20Punk%2FOne%20More%20Time.flac"
    );

    let stats = h.cache.get_cache_stats().await.unwrap();
    assert_eq!(stats.total_tracks, 0);
    assert_eq!(stats.hit_rate, 0.0);
}

#[tokio::test]
async fn download_then_hit_serves_local_blob() {
    let remote = Arc::new(FakeRemote::new());
    remote.serve("abc123", b"audio body bytes").await;
    let h = harness(remote.clone()).await;

    let outcome = h.cache.start_caching("abc123", "/music/a.flac").await;
    assert_eq!(outcome, DownloadOutcome::Downloaded { bytes: 16 });
    assert!(h.cache.is_cached("abc123").await.unwrap());

    let record = h.cache.get_cached_track("abc123").await.unwrap().unwrap();
    assert_eq!(record.tier, CacheTier::Initial);
    assert_eq!(record.replay_count, 0);
    assert_eq!(record.file_size_bytes, 16);
    assert_eq!(record.expires_at - record.cached_at, 60 * 60 * 1000);

    let uri = h.cache.get_track_uri("abc123", "/music/a.flac").await.unwrap();
    assert!(uri.starts_with("file://"), "expected local uri, got {uri}");
    assert!(uri.ends_with("abc123.audio"));

    let stats = h.cache.get_cache_stats().await.unwrap();
    assert_eq!(stats.total_tracks, 1);
    assert!(stats.hit_rate > 0.0);
    assert_eq!(stats.tier_breakdown[&CacheTier::Initial], 1);
}

#[tokio::test]
async fn second_start_caching_is_a_no_op() {
    let remote = Arc::new(FakeRemote::new());
    remote.serve("abc123", b"body").await;
    let h = harness(remote.clone()).await;

    assert!(matches!(
        h.cache.start_caching("abc123", "/music/a.flac").await,
        DownloadOutcome::Downloaded { .. }
    ));
    assert_eq!(
        h.cache.start_caching("abc123", "/music/a.flac").await,
        DownloadOutcome::AlreadyCached
    );
    assert_eq!(remote.request_count(), 1);
}

#[tokio::test]
async fn concurrent_downloads_collapse_into_one() {
    let remote = Arc::new(GatedRemote::new(b"body"));
    let h = harness(remote.clone()).await;

    let cache = h.cache.clone();
    let first = tokio::spawn(async move { cache.start_caching("abc123", "/music/a.flac").await });

    // Wait until the first transfer is inside the HTTP client.
    tokio::time::timeout(Duration::from_secs(2), remote.started.notified())
        .await
        .unwrap();

    assert_eq!(
        h.cache.start_caching("abc123", "/music/a.flac").await,
        DownloadOutcome::AlreadyInFlight
    );

    remote.gate.notify_one();
    assert_eq!(
        first.await.unwrap(),
        DownloadOutcome::Downloaded { bytes: 4 }
    );
    assert_eq!(remote.requests.load(Ordering::SeqCst), 1);
    assert!(h.cache.is_cached("abc123").await.unwrap());
}

#[tokio::test]
async fn http_error_reports_failed_and_leaves_no_trace() {
    let mut remote = MockRemote::new();
    remote.expect_get_stream().times(1).returning(|url, _| {
        Err(CacheError::HttpStatus {
            status: 503,
            url: url.to_string(),
        })
    });
    let h = harness(Arc::new(remote)).await;

    assert_eq!(
        h.cache.start_caching("abc123", "/music/a.flac").await,
        DownloadOutcome::Failed
    );
    assert!(!h.cache.is_cached("abc123").await.unwrap());
    assert!(h.cache.get_cached_track("abc123").await.unwrap().is_none());
    assert!(!h.blob_dir().join("abc123.audio").exists());
}

#[tokio::test]
async fn empty_body_is_not_admitted() {
    let remote = Arc::new(FakeRemote::new());
    remote.serve("abc123", b"").await;
    let h = harness(remote).await;

    assert_eq!(
        h.cache.start_caching("abc123", "/music/a.flac").await,
        DownloadOutcome::Failed
    );
    assert!(!h.cache.is_cached("abc123").await.unwrap());
    assert!(!h.blob_dir().join("abc123.audio.part").exists());
}

#[tokio::test]
async fn cancellation_aborts_the_transfer() {
    let h = harness(Arc::new(StalledRemote)).await;

    let cache = h.cache.clone();
    let download =
        tokio::spawn(async move { cache.start_caching("abc123", "/music/a.flac").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.cache.cancel_caching("abc123").await);
    assert_eq!(download.await.unwrap(), DownloadOutcome::Failed);
    assert!(!h.cache.is_cached("abc123").await.unwrap());
    assert!(!h.blob_dir().join("abc123.audio.part").exists());

    // The in-flight slot is free again.
    assert!(!h.cache.cancel_caching("abc123").await);
}

#[tokio::test]
async fn valid_replay_climbs_the_ladder() {
    let remote = Arc::new(FakeRemote::new());
    remote.serve("abc123", b"body").await;
    let h = harness(remote).await;
    h.cache.start_caching("abc123", "/music/a.flac").await;

    h.cache.record_replay_session("abc123", 3, 20).await.unwrap();
    let record = h.cache.get_cached_track("abc123").await.unwrap().unwrap();
    assert_eq!(record.tier, CacheTier::Replayed);
    assert_eq!(record.replay_count, 1);
    assert!(record.expires_at - now_ms() > 5 * 60 * 60 * 1000);

    for _ in 0..9 {
        h.cache.record_replay_session("abc123", 0, 30).await.unwrap();
    }
    let record = h.cache.get_cached_track("abc123").await.unwrap().unwrap();
    assert_eq!(record.tier, CacheTier::Favorite);
    assert_eq!(record.replay_count, 10);

    for _ in 0..15 {
        h.cache.record_replay_session("abc123", 0, 30).await.unwrap();
    }
    let record = h.cache.get_cached_track("abc123").await.unwrap().unwrap();
    assert_eq!(record.tier, CacheTier::Permanent);
    assert_eq!(record.replay_count, 25);
    assert!(record.expires_at - now_ms() > 13 * 24 * 60 * 60 * 1000);
}

#[tokio::test]
async fn invalid_session_is_logged_without_tier_change() {
    let remote = Arc::new(FakeRemote::new());
    remote.serve("abc123", b"body").await;
    let h = harness(remote).await;
    h.cache.start_caching("abc123", "/music/a.flac").await;

    // Deep seek start, then a too-short listen.
    h.cache.record_replay_session("abc123", 10, 120).await.unwrap();
    h.cache.record_replay_session("abc123", 0, 5).await.unwrap();

    let record = h.cache.get_cached_track("abc123").await.unwrap().unwrap();
    assert_eq!(record.tier, CacheTier::Initial);
    assert_eq!(record.replay_count, 0);

    let sessions = h.store.recent_sessions("abc123", 10).await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|s| !s.was_valid_replay));
}

#[tokio::test]
async fn replay_without_upgrade_slides_expiry_forward() {
    let remote = Arc::new(FakeRemote::new());
    remote.serve("abc123", b"body").await;
    let h = harness(remote).await;
    h.cache.start_caching("abc123", "/music/a.flac").await;

    h.cache.record_replay_session("abc123", 0, 30).await.unwrap();
    let first = h.cache.get_cached_track("abc123").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    h.cache.record_replay_session("abc123", 0, 30).await.unwrap();
    let second = h.cache.get_cached_track("abc123").await.unwrap().unwrap();

    // Count 2 is still REPLAYED, but the 6h window restarts from now.
    assert_eq!(second.tier, CacheTier::Replayed);
    assert_eq!(second.replay_count, 2);
    assert!(second.expires_at > first.expires_at);
}

#[tokio::test]
async fn replay_for_uncached_track_only_logs_the_session() {
    let h = harness(Arc::new(FakeRemote::new())).await;

    h.cache.record_replay_session("ghost", 0, 30).await.unwrap();
    assert!(h.cache.get_cached_track("ghost").await.unwrap().is_none());
    assert_eq!(h.store.valid_replay_count("ghost").await.unwrap(), 1);
}

#[tokio::test]
async fn missing_blob_self_heals_on_access() {
    let remote = Arc::new(FakeRemote::new());
    remote.serve("abc123", b"body").await;
    let h = harness(remote).await;
    h.cache.start_caching("abc123", "/music/a.flac").await;

    let mut events = h.cache.subscribe_events();
    std::fs::remove_file(h.blob_dir().join("abc123.audio")).unwrap();

    let uri = h.cache.get_track_uri("abc123", "/music/a.flac").await.unwrap();
    assert!(uri.starts_with("https://"), "expected remote fallback, got {uri}");
    assert!(h.cache.get_cached_track("abc123").await.unwrap().is_none());

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        CacheEvent::TrackEvicted {
            track_hash: "abc123".to_string(),
            reason: EvictionReason::SelfHealed,
        }
    );
}

#[tokio::test]
async fn cleanup_sweeps_expired_tracks() {
    let h = harness(Arc::new(FakeRemote::new())).await;
    let now = now_ms();
    h.seed_track("dead", CacheTier::Initial, 100, now - 1_000, now).await;
    h.seed_track("live", CacheTier::Initial, 100, now + 3_600_000, now).await;

    let report = h.cache.cleanup().await.unwrap();
    assert_eq!(report.expired_removed, 1);
    assert_eq!(report.lru_evicted, 0);
    assert_eq!(report.bytes_freed, 100);

    assert!(h.cache.get_cached_track("dead").await.unwrap().is_none());
    assert!(h.cache.get_cached_track("live").await.unwrap().is_some());
    assert!(!h.blob_dir().join("dead.audio").exists());
    assert!(h.blob_dir().join("live.audio").exists());
}

#[tokio::test]
async fn lru_eviction_protects_high_tiers() {
    // Capacity 1000, target 50%: cleanup wants to free 300 of the 800 used.
    let config = EndlessSoundConfig::default()
        .with_max_cache_size_bytes(1_000)
        .with_cleanup_threshold_percent(0.6)
        .with_cleanup_target_percent(0.5);
    let h = harness_with(config, Arc::new(FakeRemote::new())).await;

    let now = now_ms();
    let far = now + 14 * 24 * 60 * 60 * 1000;
    // Oldest first by last_accessed_at; the favorite is the coldest.
    h.seed_track("favorite", CacheTier::Favorite, 400, far, 100).await;
    h.seed_track("cold", CacheTier::Initial, 200, far, 200).await;
    h.seed_track("warm", CacheTier::Initial, 200, far, 300).await;

    let report = h.cache.cleanup().await.unwrap();

    // 300 < 0.5 * 800, so the favorite survives even as LRU head.
    assert!(h.cache.get_cached_track("favorite").await.unwrap().is_some());
    assert!(h.cache.get_cached_track("cold").await.unwrap().is_none());
    assert!(h.cache.get_cached_track("warm").await.unwrap().is_none());
    assert_eq!(report.lru_evicted, 2);
    assert_eq!(report.bytes_freed, 400);
}

#[tokio::test]
async fn severe_pressure_overrides_tier_protection() {
    // Target 10% of 1000: freeing 700 of 800 exceeds half the cache, so
    // protection yields.
    let config = EndlessSoundConfig::default()
        .with_max_cache_size_bytes(1_000)
        .with_cleanup_threshold_percent(0.2)
        .with_cleanup_target_percent(0.1);
    let h = harness_with(config, Arc::new(FakeRemote::new())).await;

    let now = now_ms();
    let far = now + 14 * 24 * 60 * 60 * 1000;
    h.seed_track("favorite", CacheTier::Favorite, 400, far, 100).await;
    h.seed_track("cold", CacheTier::Initial, 400, far, 200).await;

    h.cache.cleanup().await.unwrap();
    assert!(h.cache.get_cached_track("favorite").await.unwrap().is_none());
    assert!(h.cache.get_cached_track("cold").await.unwrap().is_none());
}

#[tokio::test]
async fn over_threshold_cache_is_cleaned_before_download() {
    let config = EndlessSoundConfig::default()
        .with_max_cache_size_bytes(1_000)
        .with_cleanup_threshold_percent(0.5)
        .with_cleanup_target_percent(0.3);
    let remote = Arc::new(FakeRemote::new());
    remote.serve("fresh", b"new body").await;
    let h = harness_with(config, remote).await;

    let now = now_ms();
    // Expired bulk that pushes usage past the 500-byte trigger.
    h.seed_track("stale", CacheTier::Initial, 900, now - 1_000, now).await;

    assert!(matches!(
        h.cache.start_caching("fresh", "/music/fresh.flac").await,
        DownloadOutcome::Downloaded { .. }
    ));
    assert!(h.cache.get_cached_track("stale").await.unwrap().is_none());
    assert!(h.cache.is_cached("fresh").await.unwrap());
}

#[tokio::test]
async fn auto_cleanup_can_be_disabled() {
    let config = EndlessSoundConfig::default()
        .with_max_cache_size_bytes(1_000)
        .with_cleanup_threshold_percent(0.5)
        .with_cleanup_target_percent(0.3)
        .with_auto_cleanup(false);
    let remote = Arc::new(FakeRemote::new());
    remote.serve("fresh", b"new body").await;
    let h = harness_with(config, remote).await;

    let now = now_ms();
    h.seed_track("stale", CacheTier::Initial, 900, now - 1_000, now).await;

    h.cache.start_caching("fresh", "/music/fresh.flac").await;
    assert!(h.cache.get_cached_track("stale").await.unwrap().is_some());
}

#[tokio::test]
async fn evict_track_ignores_tier_protection() {
    let h = harness(Arc::new(FakeRemote::new())).await;
    let now = now_ms();
    h.seed_track("perm", CacheTier::Permanent, 100, now + 1_000_000, now).await;

    assert!(h.cache.evict_track("perm").await.unwrap());
    assert!(h.cache.get_cached_track("perm").await.unwrap().is_none());
    assert!(!h.blob_dir().join("perm.audio").exists());

    assert!(!h.cache.evict_track("perm").await.unwrap());
}

#[tokio::test]
async fn clear_all_empties_cache_and_notifies() {
    let h = harness(Arc::new(FakeRemote::new())).await;
    let now = now_ms();
    h.seed_track("one", CacheTier::Initial, 10, now + 1_000_000, now).await;
    h.seed_track("two", CacheTier::Favorite, 10, now + 1_000_000, now).await;

    let mut events = h.cache.subscribe_events();
    assert_eq!(h.cache.clear_all().await.unwrap(), 2);

    let stats = h.cache.get_cache_stats().await.unwrap();
    assert_eq!(stats.total_tracks, 0);
    assert_eq!(stats.total_size_bytes, 0);

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, CacheEvent::CacheCleared { tracks_removed: 2 });
}

#[tokio::test]
async fn observed_hash_set_tracks_mutations() {
    let remote = Arc::new(FakeRemote::new());
    remote.serve("abc123", b"body").await;
    let h = harness(remote).await;

    let mut hashes = h.cache.observe_cached_track_hashes();
    assert!(hashes.borrow().is_empty());

    h.cache.start_caching("abc123", "/music/a.flac").await;
    tokio::time::timeout(Duration::from_secs(2), hashes.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(*hashes.borrow_and_update(), vec!["abc123".to_string()]);

    h.cache.evict_track("abc123").await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), hashes.changed())
        .await
        .unwrap()
        .unwrap();
    assert!(hashes.borrow_and_update().is_empty());
}

#[tokio::test]
async fn config_updates_apply_and_validate() {
    let h = harness(Arc::new(FakeRemote::new())).await;

    let updated = EndlessSoundConfig::default().with_max_cache_size_bytes(512 * 1024 * 1024);
    h.cache.update_config(updated.clone()).await.unwrap();
    assert_eq!(h.cache.get_config().await, updated);

    let invalid = EndlessSoundConfig::default().with_max_cache_size_bytes(0);
    assert!(h.cache.update_config(invalid).await.is_err());
    assert_eq!(h.cache.get_config().await, updated);
}

#[tokio::test]
async fn blob_files_use_the_hash_audio_name() {
    let remote = Arc::new(FakeRemote::new());
    remote.serve("abc123", b"body").await;
    let h = harness(remote).await;

    h.cache.start_caching("abc123", "/music/a.flac").await;
    let record = h.cache.get_cached_track("abc123").await.unwrap().unwrap();
    assert_eq!(
        Path::new(&record.blob_path).file_name().unwrap(),
        "abc123.audio"
    );
}
