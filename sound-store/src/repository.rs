//! Repository for cached-track records, replay sessions, and daily counters.
//!
//! The trait is the seam the cache engine composes against; the sqlx
//! implementation is the only production backend. Every method is a single
//! statement (or an idempotent upsert), so per-call consistency holds without
//! cross-call transactions.

use crate::error::{Result, StoreError};
use crate::models::{CacheTier, CachedTrack, DailyCacheStats, HitMissTotals, ReplaySession};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

/// Metadata store contract for the EndlessSound cache.
#[async_trait]
pub trait TrackCacheStore: Send + Sync {
    /// Create tables and indexes if they do not exist.
    async fn initialize(&self) -> Result<()>;

    // ---- cached tracks ----

    /// Insert or replace a track record.
    async fn upsert_track(&self, track: &CachedTrack) -> Result<()>;

    /// Fetch a record regardless of expiry.
    async fn get_track(&self, track_hash: &str) -> Result<Option<CachedTrack>>;

    /// Fetch a record only when it has not expired at `now_ms`.
    async fn get_valid_track(&self, track_hash: &str, now_ms: i64) -> Result<Option<CachedTrack>>;

    /// All records, expired or not.
    async fn all_tracks(&self) -> Result<Vec<CachedTrack>>;

    /// All non-expired records.
    async fn valid_tracks(&self, now_ms: i64) -> Result<Vec<CachedTrack>>;

    /// Hashes of all non-expired records.
    async fn valid_track_hashes(&self, now_ms: i64) -> Result<Vec<String>>;

    /// All expired records.
    async fn expired_tracks(&self, now_ms: i64) -> Result<Vec<CachedTrack>>;

    /// Delete one record; returns whether a row was removed.
    async fn delete_track(&self, track_hash: &str) -> Result<bool>;

    /// Delete every expired record; returns the number removed.
    async fn delete_expired(&self, now_ms: i64) -> Result<u64>;

    /// Sum of `file_size_bytes` over all records.
    async fn total_size_bytes(&self) -> Result<u64>;

    /// Number of records.
    async fn track_count(&self) -> Result<u64>;

    /// Number of records at the given tier.
    async fn count_by_tier(&self, tier: CacheTier) -> Result<u64>;

    /// Up to `limit` records ordered by `last_accessed_at` ascending.
    async fn least_recently_used(&self, limit: u32) -> Result<Vec<CachedTrack>>;

    /// Update `last_accessed_at` on a cache hit.
    async fn touch_last_accessed(&self, track_hash: &str, now_ms: i64) -> Result<()>;

    /// Apply a valid replay: increment the count, set the (possibly
    /// unchanged) tier, and move `expires_at` forward.
    async fn apply_replay(
        &self,
        track_hash: &str,
        tier: CacheTier,
        new_expires_at: i64,
    ) -> Result<()>;

    // ---- replay sessions ----

    /// Append a session row. The record's `id` field is ignored.
    async fn insert_session(&self, session: &ReplaySession) -> Result<()>;

    /// Number of valid replays logged for a track.
    async fn valid_replay_count(&self, track_hash: &str) -> Result<u64>;

    /// Most recent sessions for a track, newest first.
    async fn recent_sessions(&self, track_hash: &str, limit: u32) -> Result<Vec<ReplaySession>>;

    /// Delete sessions older than `cutoff_ms`; returns the number removed.
    async fn prune_sessions_before(&self, cutoff_ms: i64) -> Result<u64>;

    // ---- daily stats ----

    /// Count a cache hit and the bytes served from disk for `date`.
    async fn record_hit(&self, date: &str, bytes_served: u64) -> Result<()>;

    /// Count a cache miss for `date`.
    async fn record_miss(&self, date: &str) -> Result<()>;

    /// Count a completed download and the bytes fetched for `date`.
    async fn record_download(&self, date: &str, bytes_downloaded: u64) -> Result<()>;

    /// Counters for one day, if any event was recorded.
    async fn stats_for_date(&self, date: &str) -> Result<Option<DailyCacheStats>>;

    /// Hit/miss totals across all days.
    async fn hit_miss_totals(&self) -> Result<HitMissTotals>;
}

/// sqlx-backed SQLite implementation of [`TrackCacheStore`].
pub struct SqliteTrackCacheStore {
    pool: SqlitePool,
}

impl SqliteTrackCacheStore {
    /// Wrap an existing pool (see [`crate::db`]).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_track(row: &SqliteRow) -> Result<CachedTrack> {
        let tier_name: String = row.try_get("tier")?;
        let tier = CacheTier::parse(&tier_name)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown tier name '{}'", tier_name)))?;

        Ok(CachedTrack {
            track_hash: row.try_get("track_hash")?,
            original_path: row.try_get("original_path")?,
            blob_path: row.try_get("blob_path")?,
            cached_at: row.try_get("cached_at")?,
            expires_at: row.try_get("expires_at")?,
            tier,
            replay_count: row.try_get::<i64, _>("replay_count")? as u32,
            file_size_bytes: row.try_get::<i64, _>("file_size_bytes")? as u64,
            last_accessed_at: row.try_get("last_accessed_at")?,
        })
    }

    fn row_to_session(row: &SqliteRow) -> Result<ReplaySession> {
        Ok(ReplaySession {
            id: row.try_get("id")?,
            track_hash: row.try_get("track_hash")?,
            start_position_sec: row.try_get::<i64, _>("start_position_sec")? as u32,
            listened_duration_sec: row.try_get::<i64, _>("listened_duration_sec")? as u32,
            timestamp: row.try_get("timestamp")?,
            was_valid_replay: row.try_get::<i64, _>("was_valid_replay")? != 0,
        })
    }
}

#[async_trait]
impl TrackCacheStore for SqliteTrackCacheStore {
    #[instrument(skip(self))]
    async fn initialize(&self) -> Result<()> {
        debug!("Initializing track cache store");

        let statements = [
            "CREATE TABLE IF NOT EXISTS cached_tracks (
                track_hash TEXT PRIMARY KEY NOT NULL,
                original_path TEXT NOT NULL,
                blob_path TEXT NOT NULL,
                cached_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                tier TEXT NOT NULL,
                replay_count INTEGER NOT NULL DEFAULT 0,
                file_size_bytes INTEGER NOT NULL,
                last_accessed_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_tracks_expires_at
                ON cached_tracks(expires_at)",
            "CREATE INDEX IF NOT EXISTS idx_tracks_last_accessed
                ON cached_tracks(last_accessed_at)",
            "CREATE INDEX IF NOT EXISTS idx_tracks_tier ON cached_tracks(tier)",
            "CREATE TABLE IF NOT EXISTS replay_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                track_hash TEXT NOT NULL,
                start_position_sec INTEGER NOT NULL,
                listened_duration_sec INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                was_valid_replay INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_sessions_track
                ON replay_sessions(track_hash)",
            "CREATE INDEX IF NOT EXISTS idx_sessions_timestamp
                ON replay_sessions(timestamp)",
            "CREATE TABLE IF NOT EXISTS cache_stats (
                date TEXT PRIMARY KEY NOT NULL,
                hits INTEGER NOT NULL DEFAULT 0,
                misses INTEGER NOT NULL DEFAULT 0,
                downloads INTEGER NOT NULL DEFAULT 0,
                bytes_served INTEGER NOT NULL DEFAULT 0,
                bytes_downloaded INTEGER NOT NULL DEFAULT 0
            )",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        debug!("Track cache store initialized");
        Ok(())
    }

    #[instrument(skip(self, track), fields(track_hash = %track.track_hash))]
    async fn upsert_track(&self, track: &CachedTrack) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO cached_tracks (
                track_hash, original_path, blob_path, cached_at, expires_at,
                tier, replay_count, file_size_bytes, last_accessed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&track.track_hash)
        .bind(&track.original_path)
        .bind(&track.blob_path)
        .bind(track.cached_at)
        .bind(track.expires_at)
        .bind(track.tier.as_str())
        .bind(track.replay_count as i64)
        .bind(track.file_size_bytes as i64)
        .bind(track.last_accessed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_track(&self, track_hash: &str) -> Result<Option<CachedTrack>> {
        let row = sqlx::query("SELECT * FROM cached_tracks WHERE track_hash = ?")
            .bind(track_hash)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_track).transpose()
    }

    async fn get_valid_track(&self, track_hash: &str, now_ms: i64) -> Result<Option<CachedTrack>> {
        let row =
            sqlx::query("SELECT * FROM cached_tracks WHERE track_hash = ? AND expires_at > ?")
                .bind(track_hash)
                .bind(now_ms)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(Self::row_to_track).transpose()
    }

    async fn all_tracks(&self) -> Result<Vec<CachedTrack>> {
        let rows = sqlx::query("SELECT * FROM cached_tracks")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_track).collect()
    }

    async fn valid_tracks(&self, now_ms: i64) -> Result<Vec<CachedTrack>> {
        let rows = sqlx::query("SELECT * FROM cached_tracks WHERE expires_at > ?")
            .bind(now_ms)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_track).collect()
    }

    async fn valid_track_hashes(&self, now_ms: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT track_hash FROM cached_tracks WHERE expires_at > ? ORDER BY track_hash",
        )
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("track_hash").map_err(StoreError::from))
            .collect()
    }

    async fn expired_tracks(&self, now_ms: i64) -> Result<Vec<CachedTrack>> {
        let rows = sqlx::query("SELECT * FROM cached_tracks WHERE expires_at <= ?")
            .bind(now_ms)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_track).collect()
    }

    #[instrument(skip(self))]
    async fn delete_track(&self, track_hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cached_tracks WHERE track_hash = ?")
            .bind(track_hash)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete_expired(&self, now_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cached_tracks WHERE expires_at <= ?")
            .bind(now_ms)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn total_size_bytes(&self) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(file_size_bytes), 0) AS total FROM cached_tracks",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("total")? as u64)
    }

    async fn track_count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM cached_tracks")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get::<i64, _>("count")? as u64)
    }

    async fn count_by_tier(&self, tier: CacheTier) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM cached_tracks WHERE tier = ?")
            .bind(tier.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get::<i64, _>("count")? as u64)
    }

    async fn least_recently_used(&self, limit: u32) -> Result<Vec<CachedTrack>> {
        let rows =
            sqlx::query("SELECT * FROM cached_tracks ORDER BY last_accessed_at ASC LIMIT ?")
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(Self::row_to_track).collect()
    }

    async fn touch_last_accessed(&self, track_hash: &str, now_ms: i64) -> Result<()> {
        sqlx::query("UPDATE cached_tracks SET last_accessed_at = ? WHERE track_hash = ?")
            .bind(now_ms)
            .bind(track_hash)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn apply_replay(
        &self,
        track_hash: &str,
        tier: CacheTier,
        new_expires_at: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE cached_tracks
             SET replay_count = replay_count + 1, tier = ?, expires_at = ?
             WHERE track_hash = ?",
        )
        .bind(tier.as_str())
        .bind(new_expires_at)
        .bind(track_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_session(&self, session: &ReplaySession) -> Result<()> {
        sqlx::query(
            "INSERT INTO replay_sessions (
                track_hash, start_position_sec, listened_duration_sec,
                timestamp, was_valid_replay
            ) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session.track_hash)
        .bind(session.start_position_sec as i64)
        .bind(session.listened_duration_sec as i64)
        .bind(session.timestamp)
        .bind(session.was_valid_replay as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn valid_replay_count(&self, track_hash: &str) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM replay_sessions
             WHERE track_hash = ? AND was_valid_replay = 1",
        )
        .bind(track_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("count")? as u64)
    }

    async fn recent_sessions(&self, track_hash: &str, limit: u32) -> Result<Vec<ReplaySession>> {
        let rows = sqlx::query(
            "SELECT * FROM replay_sessions WHERE track_hash = ?
             ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(track_hash)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_session).collect()
    }

    #[instrument(skip(self))]
    async fn prune_sessions_before(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM replay_sessions WHERE timestamp < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn record_hit(&self, date: &str, bytes_served: u64) -> Result<()> {
        sqlx::query(
            "INSERT INTO cache_stats (date, hits, bytes_served) VALUES (?, 1, ?)
             ON CONFLICT(date) DO UPDATE SET
                hits = hits + 1,
                bytes_served = bytes_served + excluded.bytes_served",
        )
        .bind(date)
        .bind(bytes_served as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_miss(&self, date: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO cache_stats (date, misses) VALUES (?, 1)
             ON CONFLICT(date) DO UPDATE SET misses = misses + 1",
        )
        .bind(date)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_download(&self, date: &str, bytes_downloaded: u64) -> Result<()> {
        sqlx::query(
            "INSERT INTO cache_stats (date, downloads, bytes_downloaded) VALUES (?, 1, ?)
             ON CONFLICT(date) DO UPDATE SET
                downloads = downloads + 1,
                bytes_downloaded = bytes_downloaded + excluded.bytes_downloaded",
        )
        .bind(date)
        .bind(bytes_downloaded as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn stats_for_date(&self, date: &str) -> Result<Option<DailyCacheStats>> {
        let row = sqlx::query("SELECT * FROM cache_stats WHERE date = ?")
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(DailyCacheStats {
            date: row.try_get("date")?,
            hits: row.try_get::<i64, _>("hits")? as u64,
            misses: row.try_get::<i64, _>("misses")? as u64,
            downloads: row.try_get::<i64, _>("downloads")? as u64,
            bytes_served: row.try_get::<i64, _>("bytes_served")? as u64,
            bytes_downloaded: row.try_get::<i64, _>("bytes_downloaded")? as u64,
        }))
    }

    async fn hit_miss_totals(&self) -> Result<HitMissTotals> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(hits), 0) AS hits, COALESCE(SUM(misses), 0) AS misses
             FROM cache_stats",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(HitMissTotals {
            hits: row.try_get::<i64, _>("hits")? as u64,
            misses: row.try_get::<i64, _>("misses")? as u64,
        })
    }
}
