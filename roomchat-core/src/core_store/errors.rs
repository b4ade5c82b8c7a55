/*
    errors.rs - Error types for the persistence gateway

    Every backend maps its native failures onto these variants so callers
    can tell "the store is down" apart from "the data is bad".
*/

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable: pool exhausted, I/O failure, lock poisoned
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored document does not decode into the expected shape
    #[error("Corrupted document: {0}")]
    Corrupted(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Unavailable(format!("connection pool: {}", err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Unavailable("pool timed out".to_string());
        assert_eq!(err.to_string(), "Storage unavailable: pool timed out");
    }

    #[test]
    fn test_sqlite_errors_are_unavailable() {
        let err: StoreError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
