use thiserror::Error;

/// Errors surfaced by the metadata store.
///
/// All variants are recoverable from the caller's perspective: a failed call
/// leaves no partially written row behind.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying SQLite/sqlx failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted value could not be interpreted (e.g. an unknown tier name).
    #[error("Corrupt cache record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
