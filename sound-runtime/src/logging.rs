//! # Logging & Tracing Infrastructure
//!
//! Configures the `tracing-subscriber` stack used by every workspace crate.
//! Filtering honors `RUST_LOG` when set; otherwise the configured default
//! directive applies.

use crate::error::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line, human-oriented output for development.
    #[default]
    Pretty,
    /// Single-line output for log aggregation.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset (e.g. `"info"`,
    /// `"sound_cache=debug,info"`).
    pub default_directive: String,
    /// Output format.
    pub format: LogFormat,
    /// Include span targets in output.
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".to_string(),
            format: LogFormat::Pretty,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Set the fallback filter directive.
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.default_directive = directive.into();
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Initialize the global tracing subscriber.
///
/// Safe to call once per process; a second call reports
/// [`Error::Logging`] instead of panicking so tests can share a process.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_directive))
        .map_err(|e| Error::Config(format!("Invalid filter directive: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let result = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };

    result.map_err(|e| Error::Logging(e.to_string()))
}
