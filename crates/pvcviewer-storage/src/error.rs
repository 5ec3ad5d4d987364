// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Storage error type
#[derive(Error, Debug, Diagnostic)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {message}")]
    #[diagnostic(
        code(pvcviewer::storage::database_error),
        help("Check that the charm directory is writable and the state file is not corrupted")
    )]
    DatabaseError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transaction error
    #[error("Transaction error: {message}")]
    #[diagnostic(
        code(pvcviewer::storage::transaction_error),
        help("Another process may hold the state file open; retry on the next event")
    )]
    TransactionError { message: String },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(pvcviewer::storage::serialization_error),
        help("The stored value has an unexpected format; delete the state file to regenerate it")
    )]
    SerializationError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Create a DatabaseError
    pub fn database_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::DatabaseError {
            message: message.into(),
            source,
        }
    }

    /// Create a TransactionError
    pub fn transaction_error(message: impl Into<String>) -> Self {
        Self::TransactionError {
            message: message.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::database_error(format!("Failed to open database: {}", err), Some(Box::new(err)))
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::transaction_error(format!("Transaction error: {}", err))
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::database_error(format!("Storage error: {}", err), Some(Box::new(err)))
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::database_error(format!("Table error: {}", err), Some(Box::new(err)))
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::transaction_error(format!("Commit error: {}", err))
    }
}
