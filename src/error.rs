//! Error types for the tether controller and agent

use thiserror::Error;

/// Result type alias for tether operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the controller or the node agent
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Authentication/authorization error
    #[error("auth error: {0}")]
    Auth(String),

    /// Account locked out after repeated failures
    #[error("account locked, retry in {remaining_seconds}s")]
    LockedOut {
        /// Seconds until the lockout expires
        remaining_seconds: i64,
    },

    /// Command lifecycle conflict (report contradicts stored state)
    #[error("command state conflict: {0}")]
    Conflict(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Request payload failed validation
    #[error("invalid request: {0}")]
    Validation(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
