//! Replay validation.
//!
//! A playback session counts as a replay only when the listener started near
//! the beginning of the track and actually stayed with it. Seek-heavy
//! sampling and quick skips never advance a track's tier.

/// A session must start within the first 6 seconds of the track.
pub const VALID_REPLAY_MAX_START_SEC: u32 = 6;

/// A session must cover at least 15 seconds of listening.
pub const VALID_REPLAY_MIN_DURATION_SEC: u32 = 15;

/// Whether a playback session counts as a valid replay.
///
/// Both conditions must hold; the boundary values themselves are accepted.
pub fn is_valid_replay(start_position_sec: u32, listened_duration_sec: u32) -> bool {
    start_position_sec <= VALID_REPLAY_MAX_START_SEC
        && listened_duration_sec >= VALID_REPLAY_MIN_DURATION_SEC
}
