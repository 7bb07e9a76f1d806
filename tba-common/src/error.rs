//! Common error types for the tax budget allocator

use thiserror::Error;

/// Common result type for allocator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the ledger, summary table, cache and update pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger or summary table I/O failure (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Storage failure without an underlying sqlx cause (e.g. retries exhausted)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Allocation percentages malformed or not summing to exactly 100.00
    #[error("Validation error: {0}")]
    Validation(String),

    /// Cache tier unreachable; readers treat this as a miss
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Background aggregate queue full or shut down
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure is lock contention or pool exhaustion that a retry may clear.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::PoolTimedOut) => true,
            Error::Database(sqlx::Error::Database(db_err)) => {
                // SQLITE_BUSY = 5, SQLITE_LOCKED = 6 (extended codes keep the low byte)
                let busy_code = db_err
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| matches!(code & 0xff, 5 | 6))
                    .unwrap_or(false);
                busy_code || db_err.message().contains("database is locked")
            }
            _ => false,
        }
    }
}
