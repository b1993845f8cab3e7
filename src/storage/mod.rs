//! Storage module for persisting harvested reviews
//!
//! This module handles:
//! - The `Review` record extracted from listing pages and its vocabularies
//! - The `Repository` trait and its SQLite and JSON-lines implementations
//! - Detection of the same review being written by two pages in one run

mod file;
mod review;
mod schema;
mod sqlite;
mod traits;

pub(crate) use file::{append_synced, write_or_truncate};
pub use file::{FileRepository, StoredReview};
pub use review::{Characteristic, DriveType, Review};
pub use schema::initialize_schema;
pub use sqlite::SqliteRepository;
pub use traits::{Repository, StorageError, StorageResult};

use crate::config::{StorageBackend, StorageConfig};
use crate::state::PageId;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Opens the repository selected by the storage configuration
///
/// # Arguments
///
/// * `config` - Validated storage section; the path for the chosen backend is set
///
/// # Returns
///
/// * `Ok(Arc<dyn Repository>)` - SQLite or JSON-lines repository, ready for concurrent saves
/// * `Err(StorageError)` - The database or records file could not be opened
pub fn open_repository(config: &StorageConfig) -> StorageResult<Arc<dyn Repository>> {
    match config.backend {
        StorageBackend::Sqlite => {
            let path = config.database_path.as_deref().unwrap_or_default();
            Ok(Arc::new(SqliteRepository::new(Path::new(path))?))
        }
        StorageBackend::File => {
            let path = config.records_path.as_deref().unwrap_or_default();
            Ok(Arc::new(FileRepository::open(Path::new(path))?))
        }
    }
}

/// Which page wrote which review during the current run
///
/// Shared by both repositories so a review reaching storage from two
/// different pages is reported instead of silently replaced.
#[derive(Debug, Default)]
pub(crate) struct RecordClaims {
    owners: Mutex<HashMap<String, PageId>>,
}

impl RecordClaims {
    /// Claims every record for `page`, or none if any belongs to another page
    pub(crate) fn claim(&self, page: PageId, records: &[Review]) -> StorageResult<()> {
        let mut owners = self.owners.lock().unwrap_or_else(|e| e.into_inner());

        for record in records {
            if let Some(&owner) = owners.get(&record.link) {
                if owner != page {
                    return Err(StorageError::Conflict {
                        link: record.link.clone(),
                        first: owner,
                        second: page,
                    });
                }
            }
        }

        for record in records {
            owners.insert(record.link.clone(), page);
        }
        Ok(())
    }

    /// Drops claims made by `page` after its write failed
    pub(crate) fn release(&self, page: PageId, records: &[Review]) {
        let mut owners = self.owners.lock().unwrap_or_else(|e| e.into_inner());
        for record in records {
            if owners.get(&record.link) == Some(&page) {
                owners.remove(&record.link);
            }
        }
    }
}
