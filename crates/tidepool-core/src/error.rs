//! Error types for tidepool

use thiserror::Error;

/// Core error type for tidepool operations
#[derive(Error, Debug)]
pub enum TidepoolError {
    /// Invalid pool size, missing or unusable connection parameters
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The configured driver id is not registered
    #[error("Unknown driver: {0}")]
    UnknownDriver(String),

    #[error("Failed getting connection; pool exhausted")]
    PoolExhausted,

    /// Returned by `add_connection` when the pool already holds `size`
    /// idle connections. A connection passed in is dropped and closed.
    #[error("Failed adding connection; pool is full")]
    PoolFull,

    /// Connectivity loss or any failure that leaves the session unusable
    #[error("Operational error: {0}")]
    Operational(String),

    /// Malformed SQL or any other statement-level failure
    #[error("Query error: {0}")]
    Query(String),

    /// Constraint violation reported by the server
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Connection is not open")]
    NotConnected,

    /// A connection from another driver was handed to the pool. A
    /// connection passed to `add_connection` is dropped and closed.
    #[error("Connection driver mismatch: expected {expected}, found {found}")]
    ConnectionMismatch { expected: String, found: String },

    #[error("Multiple rows returned for single-row query ({0} rows)")]
    MultipleRows(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl TidepoolError {
    /// Whether the error means the underlying session can no longer be
    /// trusted and must be reopened before the next statement.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            TidepoolError::Operational(_) | TidepoolError::Io(_) | TidepoolError::NotConnected
        )
    }

    /// Whether the error originates in the pool itself rather than in a driver.
    pub fn is_pool_error(&self) -> bool {
        matches!(
            self,
            TidepoolError::PoolExhausted
                | TidepoolError::PoolFull
                | TidepoolError::ConnectionMismatch { .. }
        )
    }
}

/// Result type alias for tidepool operations
pub type Result<T> = std::result::Result<T, TidepoolError>;
