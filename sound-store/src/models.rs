//! Domain models for the EndlessSound cache.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Milliseconds since the Unix epoch, per the system clock.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Retention tiers for cached tracks, unlocked by cumulative valid replays.
///
/// The ladder is a total order; variant order defines rank. A record's tier
/// never moves down over its life.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// First listen.
    Initial,
    /// At least one valid replay.
    Replayed,
    /// 10+ valid replays.
    Favorite,
    /// 25+ valid replays.
    Permanent,
}

impl CacheTier {
    /// All tiers in ascending rank order.
    pub const ALL: [CacheTier; 4] = [
        CacheTier::Initial,
        CacheTier::Replayed,
        CacheTier::Favorite,
        CacheTier::Permanent,
    ];

    /// Time-to-live granted by this tier.
    pub fn ttl(self) -> Duration {
        match self {
            CacheTier::Initial => Duration::from_secs(60 * 60),
            CacheTier::Replayed => Duration::from_secs(6 * 60 * 60),
            CacheTier::Favorite => Duration::from_secs(3 * 24 * 60 * 60),
            CacheTier::Permanent => Duration::from_secs(14 * 24 * 60 * 60),
        }
    }

    /// Time-to-live in milliseconds.
    pub fn ttl_ms(self) -> i64 {
        self.ttl().as_millis() as i64
    }

    /// Minimum valid replay count required to unlock this tier.
    pub fn min_replays(self) -> u32 {
        match self {
            CacheTier::Initial => 0,
            CacheTier::Replayed => 1,
            CacheTier::Favorite => 10,
            CacheTier::Permanent => 25,
        }
    }

    /// Returns the highest tier whose `min_replays` threshold is satisfied.
    pub fn for_replay_count(count: u32) -> CacheTier {
        CacheTier::ALL
            .into_iter()
            .rev()
            .find(|tier| count >= tier.min_replays())
            .unwrap_or(CacheTier::Initial)
    }

    /// Stable name used for persistence and events. The ladder may be
    /// reordered or extended without invalidating stored rows.
    pub fn as_str(self) -> &'static str {
        match self {
            CacheTier::Initial => "initial",
            CacheTier::Replayed => "replayed",
            CacheTier::Favorite => "favorite",
            CacheTier::Permanent => "permanent",
        }
    }

    /// Parses a stable tier name.
    pub fn parse(s: &str) -> Option<CacheTier> {
        match s {
            "initial" => Some(CacheTier::Initial),
            "replayed" => Some(CacheTier::Replayed),
            "favorite" => Some(CacheTier::Favorite),
            "permanent" => Some(CacheTier::Permanent),
            _ => None,
        }
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached audio track's metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedTrack {
    /// Unique track identity.
    pub track_hash: String,
    /// Original remote path of the track on the server.
    pub original_path: String,
    /// Absolute path of the cached blob on disk.
    pub blob_path: String,
    /// When the blob was stored (epoch millis).
    pub cached_at: i64,
    /// When the record expires (epoch millis); always the last tier-affecting
    /// event plus the tier's TTL.
    pub expires_at: i64,
    /// Current retention tier. Monotonically non-decreasing.
    pub tier: CacheTier,
    /// Number of valid replays recorded for this track.
    pub replay_count: u32,
    /// Size of the cached blob in bytes.
    pub file_size_bytes: u64,
    /// Last cache-hit time (epoch millis).
    pub last_accessed_at: i64,
}

impl CachedTrack {
    /// Whether the record has passed its expiry time.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

/// One playback session reported by the player, logged whether or not it
/// counted as a valid replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySession {
    /// Row id; 0 until persisted.
    pub id: i64,
    /// Track the session belongs to.
    pub track_hash: String,
    /// Playback start position in seconds.
    pub start_position_sec: u32,
    /// Seconds actually listened.
    pub listened_duration_sec: u32,
    /// When the session ended (epoch millis).
    pub timestamp: i64,
    /// Whether the session passed replay validation.
    pub was_valid_replay: bool,
}

/// Per-calendar-day cache counters, created lazily on the first event of the
/// day. `date` is a `YYYY-MM-DD` key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCacheStats {
    pub date: String,
    pub hits: u64,
    pub misses: u64,
    pub downloads: u64,
    pub bytes_served: u64,
    pub bytes_downloaded: u64,
}

/// Hit/miss totals aggregated across all days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HitMissTotals {
    pub hits: u64,
    pub misses: u64,
}

impl HitMissTotals {
    /// Hit rate in `[0.0, 1.0]`; 0.0 when no events have been recorded.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
