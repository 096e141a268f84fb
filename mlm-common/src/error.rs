//! Common error types for MLM services

use thiserror::Error;

/// Common result type for MLM operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the MLM crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored value that cannot be decoded (member id, timestamp)
    #[error("Corrupt stored value: {0}")]
    CorruptValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_value_display_names_the_value() {
        let err = crate::time::from_storage("soon").unwrap_err();
        assert!(matches!(err, Error::CorruptValue(_)));
        assert!(err.to_string().starts_with("Corrupt stored value:"));
        assert!(err.to_string().contains("\"soon\""));
    }
}
