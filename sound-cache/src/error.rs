//! Cache error types.

use thiserror::Error;

/// Errors from the cache engine.
///
/// None of these abort playback: download failures are logged on the
/// background path (the caller already holds a streaming URL), and metadata
/// corruption self-heals on the next access.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Metadata store failure.
    #[error("Store error: {0}")]
    Store(#[from] sound_store::StoreError),

    /// Blob filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level download failure (connect, timeout, TLS).
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// The download produced zero bytes; no cache entry is created.
    #[error("Empty download for track {0}")]
    EmptyDownload(String),

    /// An in-flight download was cancelled.
    #[error("Download cancelled for track {0}")]
    Cancelled(String),

    /// Rejected configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
