use std::fmt::{Display, Formatter};

use redb::{
    CommitError, DatabaseError, Error as RedbError, StorageError, TableError, TransactionError,
};
use serde_json::Error as SerdeError;

/// Faults the storage layer surfaces to callers.
///
/// Network problems never appear here: a failed remote request demotes the
/// write to the offline path instead of failing it. Only storage-engine and
/// serialization faults abort an operation.
#[derive(Debug)]
pub enum StoreError {
    DatabaseError(String),
    SerializationError(String),
    CorruptedDatabase(String),
    NotFound(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            StoreError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            StoreError::CorruptedDatabase(msg) => write!(f, "Database is corrupted: {}", msg),
            StoreError::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<RedbError> for StoreError {
    fn from(err: RedbError) -> Self {
        match err {
            RedbError::TableDoesNotExist(name) => {
                StoreError::NotFound(format!("Table '{}' not found", name))
            }
            RedbError::Corrupted(msg) => StoreError::CorruptedDatabase(msg.to_string()),
            RedbError::Io(io_err) => StoreError::DatabaseError(format!("IO error: {}", io_err)),
            _ => StoreError::DatabaseError(format!("Database error: {:?}", err)),
        }
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::DatabaseAlreadyOpen => {
                StoreError::DatabaseError("Database is already open".to_string())
            }
            DatabaseError::Storage(storage) => StoreError::from(storage),
            _ => StoreError::DatabaseError(format!("Failed to open database: {:?}", err)),
        }
    }
}

impl From<SerdeError> for StoreError {
    fn from(err: SerdeError) -> Self {
        StoreError::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<TransactionError> for StoreError {
    fn from(err: TransactionError) -> Self {
        StoreError::DatabaseError(format!("Transaction error: {:?}", err))
    }
}

impl From<TableError> for StoreError {
    fn from(err: TableError) -> Self {
        StoreError::DatabaseError(format!("Table operation error: {:?}", err))
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Corrupted(msg) => StoreError::CorruptedDatabase(msg),
            other => StoreError::DatabaseError(format!("Storage error: {:?}", other)),
        }
    }
}

impl From<CommitError> for StoreError {
    fn from(err: CommitError) -> Self {
        StoreError::DatabaseError(format!("Commit error: {:?}", err))
    }
}
