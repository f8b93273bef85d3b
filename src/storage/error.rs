//! Errors a persistence backend hands back to the monitor

use std::fmt;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    /// An aggregate, alert or sample could not be written
    WriteFailed(String),

    /// Loading records failed
    QueryFailed(String),

    /// The record to update does not exist
    NotFound(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::WriteFailed(msg) => write!(f, "storage write failed: {}", msg),
            StorageError::QueryFailed(msg) => write!(f, "storage query failed: {}", msg),
            StorageError::NotFound(what) => write!(f, "no such record: {}", what),
        }
    }
}

impl std::error::Error for StorageError {}
