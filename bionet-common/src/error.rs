//! Common error types for bionet

use thiserror::Error;

/// Common result type for bionet operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across bionet services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A compare-and-swap write lost against a concurrent writer
    #[error("Transaction conflict on {document} after {attempts} attempt(s)")]
    TransactionConflict { document: String, attempts: u32 },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures that a retry with backoff can resolve.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TransactionConflict { .. } => true,
            Error::Database(db_err) => db_err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        let conflict = Error::TransactionConflict {
            document: "all_time_summary/global".to_string(),
            attempts: 1,
        };
        assert!(conflict.is_retryable());
        assert!(!Error::InvalidInput("bad key".to_string()).is_retryable());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_retryable());
    }

    #[test]
    fn test_conflict_message() {
        let err = Error::TransactionConflict {
            document: "all_time_summary/global".to_string(),
            attempts: 8,
        };
        assert_eq!(
            err.to_string(),
            "Transaction conflict on all_time_summary/global after 8 attempt(s)"
        );
    }
}
