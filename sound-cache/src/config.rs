//! Runtime-tunable cache configuration.

use serde::{Deserialize, Serialize};

/// Default cache capacity: 2 GiB.
pub const DEFAULT_MAX_CACHE_SIZE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Cleanup kicks in once usage crosses this fraction of the capacity.
pub const DEFAULT_CLEANUP_THRESHOLD_PERCENT: f64 = 0.9;

/// Cleanup evicts down to this fraction of the capacity.
pub const DEFAULT_CLEANUP_TARGET_PERCENT: f64 = 0.7;

/// Cache sizing and cleanup behaviour.
///
/// All fields can be replaced at runtime through
/// [`EndlessSound::update_config`](crate::EndlessSound::update_config);
/// the new values apply from the next operation onward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndlessSoundConfig {
    /// Upper bound on total blob bytes.
    pub max_cache_size_bytes: u64,
    /// Usage fraction (of `max_cache_size_bytes`) that triggers an automatic
    /// cleanup before the next download.
    pub cleanup_threshold_percent: f64,
    /// Usage fraction cleanup shrinks the cache down to.
    pub cleanup_target_percent: f64,
    /// When false, no cleanup runs implicitly; only explicit calls evict.
    pub enable_auto_cleanup: bool,
}

impl Default for EndlessSoundConfig {
    fn default() -> Self {
        Self {
            max_cache_size_bytes: DEFAULT_MAX_CACHE_SIZE_BYTES,
            cleanup_threshold_percent: DEFAULT_CLEANUP_THRESHOLD_PERCENT,
            cleanup_target_percent: DEFAULT_CLEANUP_TARGET_PERCENT,
            enable_auto_cleanup: true,
        }
    }
}

impl EndlessSoundConfig {
    pub fn with_max_cache_size_bytes(mut self, bytes: u64) -> Self {
        self.max_cache_size_bytes = bytes;
        self
    }

    pub fn with_cleanup_threshold_percent(mut self, fraction: f64) -> Self {
        self.cleanup_threshold_percent = fraction;
        self
    }

    pub fn with_cleanup_target_percent(mut self, fraction: f64) -> Self {
        self.cleanup_target_percent = fraction;
        self
    }

    pub fn with_auto_cleanup(mut self, enabled: bool) -> Self {
        self.enable_auto_cleanup = enabled;
        self
    }

    /// Rejects sizes of zero and fractions outside `(0, 1]`, and requires the
    /// cleanup target to sit below the trigger threshold.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_cache_size_bytes == 0 {
            return Err("max_cache_size_bytes must be greater than zero".to_string());
        }
        for (name, value) in [
            ("cleanup_threshold_percent", self.cleanup_threshold_percent),
            ("cleanup_target_percent", self.cleanup_target_percent),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(format!("{name} must be within (0, 1], got {value}"));
            }
        }
        if self.cleanup_target_percent > self.cleanup_threshold_percent {
            return Err(format!(
                "cleanup_target_percent ({}) must not exceed cleanup_threshold_percent ({})",
                self.cleanup_target_percent, self.cleanup_threshold_percent
            ));
        }
        Ok(())
    }
}
