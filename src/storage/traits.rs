//! Storage traits and error types
//!
//! This module defines the repository interface the worker pipeline writes
//! through, and the error type shared by repositories and page trackers.

use crate::state::PageId;
use crate::storage::Review;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage worker failed: {0}")]
    Worker(String),

    #[error("Record {link} written by page {first} is written again by page {second}")]
    Conflict {
        link: String,
        first: PageId,
        second: PageId,
    },
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StorageError::Worker(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for review repositories
///
/// Implementations must accept concurrent `save` calls from distinct workers.
/// A record already written by another page during the same run is a
/// `StorageError::Conflict`, never an overwrite.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Durably persists all reviews extracted from `page`
    ///
    /// Either every record is stored or the call fails. Blocking disk work
    /// runs on the blocking pool, never on the async workers.
    ///
    /// # Arguments
    ///
    /// * `page` - The listing page the records were extracted from
    /// * `records` - Reviews to store; an empty slice is a no-op
    ///
    /// # Errors
    ///
    /// * `StorageError::Conflict` if another page already wrote one of the
    ///   records during this run; nothing from the batch is stored
    /// * Any backend error; nothing from the batch is stored
    async fn save(&self, page: PageId, records: &[Review]) -> StorageResult<()>;

    /// Counts stored reviews
    ///
    /// # Returns
    ///
    /// The number of stored records, counting repeated lines of the file
    /// backend separately
    async fn count(&self) -> StorageResult<u64>;
}
