use thiserror::Error;

/// Custom error type for gateway operations.
#[derive(Error, Debug)]
pub enum DbError {
    /// Configuration error (e.g., unsupported driver kind or malformed
    /// connection parameters).
    #[error("configuration error: {0}")]
    Config(String),
    /// Connection error (e.g., network or authentication failure reaching
    /// the target database).
    #[error("connection error: {0}")]
    Connection(String),
    /// Error reported by the underlying engine for a rejected statement.
    #[error("query error: {0}")]
    Query(String),
    /// Invalid request parameter, rejected before any connection is made.
    #[error("validation error: {0}")]
    Validation(String),
    /// Row or column decoding failure (malformed JSON payload, unexpected
    /// representation).
    #[error("decode error: {0}")]
    Decode(String),
    /// A statement inside a batch failed; the whole batch was rolled back.
    #[error("transaction error: {0}")]
    Transaction(String),
    /// Cache read/write failure. Never propagated to callers, always
    /// degraded to a live fetch.
    #[error("cache error: {0}")]
    Cache(String),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::Query(err.to_string())
    }
}

impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        DbError::Query(err.to_string())
    }
}

impl From<mongodb::error::Error> for DbError {
    fn from(err: mongodb::error::Error) -> Self {
        DbError::Query(err.to_string())
    }
}
