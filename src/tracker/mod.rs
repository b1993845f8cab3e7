//! Visited-page tracking
//!
//! A page is recorded here only after every review it produced has been
//! persisted, so a crash between persisting and marking repeats the page
//! rather than losing it.
//!
//! # Components
//!
//! - `PageTracker`: durable visited-set interface used by the coordinator
//! - `VisitedSet`: in-memory view with the contiguous high-water mark
//! - `SqliteTracker` / `FileTracker`: the two backends

mod file;
mod sqlite;

pub use file::FileTracker;
pub use sqlite::SqliteTracker;

use crate::config::{StorageBackend, StorageConfig};
use crate::state::PageId;
use crate::storage::StorageResult;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Durable record of which listing pages have been fully processed
///
/// Writes are serialized internally and are committed before they return.
/// Reads are served from memory.
pub trait PageTracker: Send + Sync {
    /// Checks whether `id` was fully processed by this or an earlier run
    fn is_visited(&self, id: PageId) -> bool;

    /// Durably records `id` as processed
    ///
    /// Must only be called after every record from the page was persisted.
    /// Re-marking a visited page is a no-op that succeeds.
    ///
    /// # Arguments
    ///
    /// * `id` - The page whose records are stored
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the write could not be committed; the page
    /// then stays unvisited, in memory and on disk
    fn mark_visited(&self, id: PageId) -> StorageResult<()>;

    /// Gets the point a new run resumes after
    ///
    /// # Returns
    ///
    /// The largest page such that every page from the first one up to it is
    /// visited, or `None` if the first page itself is unvisited
    fn load_resume_point(&self) -> Option<PageId>;

    fn visited_count(&self) -> u64;

    /// Visited pages in ascending order
    fn visited_pages(&self) -> Vec<PageId>;

    /// Listing size recorded by the previous run
    fn total_pages(&self) -> Option<u64>;

    /// Records the listing size without touching visited pages
    fn store_total_pages(&self, total: u64) -> StorageResult<()>;

    /// Records a grown listing size and moves every visited page back
    ///
    /// On a newest-first listing, `delta` pages prepended since the last run
    /// push everything already harvested `delta` positions further back.
    /// The new size and the shifted pages are committed together: after a
    /// crash either both are visible or neither is.
    ///
    /// # Arguments
    ///
    /// * `total` - The listing size seen by this run
    /// * `delta` - How many pages were added since the stored size
    fn record_growth(&self, total: u64, delta: u64) -> StorageResult<()>;

    /// Forgets all visited pages and the stored listing size
    fn reset(&self) -> StorageResult<()>;
}

/// Visited pages plus the contiguous high-water mark
#[derive(Debug, Clone)]
pub struct VisitedSet {
    first: PageId,
    pages: BTreeSet<PageId>,
    high_water: Option<PageId>,
}

impl VisitedSet {
    pub fn new(first: PageId) -> Self {
        Self {
            first,
            pages: BTreeSet::new(),
            high_water: None,
        }
    }

    /// Adds `id`, returning false if it was already present
    pub fn insert(&mut self, id: PageId) -> bool {
        let inserted = self.pages.insert(id);
        if inserted {
            self.advance();
        }
        inserted
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.pages.contains(&id)
    }

    pub fn high_water(&self) -> Option<PageId> {
        self.high_water
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = PageId> + '_ {
        self.pages.iter().copied()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.high_water = None;
    }

    /// Returns a copy with every page moved `delta` positions back
    pub fn shifted(&self, delta: u64) -> VisitedSet {
        let mut shifted = VisitedSet::new(self.first);
        for id in self.iter() {
            shifted.insert(PageId(id.get() + delta));
        }
        shifted
    }

    fn advance(&mut self) {
        let mut next = self.high_water.map(PageId::next).unwrap_or(self.first);
        while self.pages.contains(&next) {
            self.high_water = Some(next);
            next = next.next();
        }
    }
}

/// Opens the tracker that belongs to the configured storage backend
///
/// The SQLite tracker shares the review database; the file tracker keeps its
/// own log next to the records file.
///
/// # Arguments
///
/// * `config` - Storage section of the configuration
/// * `first` - First listing page, the base of the resume point
///
/// # Errors
///
/// Returns a `StorageError` if the store cannot be opened or holds a
/// malformed entry
pub fn open_tracker(
    config: &StorageConfig,
    first: PageId,
) -> StorageResult<Arc<dyn PageTracker>> {
    match config.backend {
        StorageBackend::Sqlite => {
            let path = config.database_path.as_deref().unwrap_or_default();
            Ok(Arc::new(SqliteTracker::open(Path::new(path), first)?))
        }
        StorageBackend::File => {
            let path = config.tracker_path.as_deref().unwrap_or_default();
            Ok(Arc::new(FileTracker::open(Path::new(path), first)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(first: u64, ids: &[u64]) -> VisitedSet {
        let mut set = VisitedSet::new(PageId(first));
        for &id in ids {
            set.insert(PageId(id));
        }
        set
    }

    #[test]
    fn test_high_water_is_contiguous_prefix() {
        assert_eq!(set_of(1, &[]).high_water(), None);
        assert_eq!(set_of(1, &[2, 3]).high_water(), None);
        assert_eq!(set_of(1, &[1, 2, 4]).high_water(), Some(PageId(2)));
        assert_eq!(set_of(1, &[4, 2, 1, 3]).high_water(), Some(PageId(4)));
    }

    #[test]
    fn test_high_water_respects_first_page() {
        assert_eq!(set_of(5, &[1, 2, 3]).high_water(), None);
        assert_eq!(set_of(5, &[5, 6, 8]).high_water(), Some(PageId(6)));
    }

    #[test]
    fn test_insert_reports_duplicates() {
        let mut set = VisitedSet::new(PageId(1));
        assert!(set.insert(PageId(1)));
        assert!(!set.insert(PageId(1)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_shifted_moves_pages_and_recomputes_mark() {
        let set = set_of(1, &[1, 2, 3]);
        let shifted = set.shifted(2);

        assert_eq!(
            shifted.iter().collect::<Vec<_>>(),
            vec![PageId(3), PageId(4), PageId(5)]
        );
        assert_eq!(shifted.high_water(), None);
    }

    #[test]
    fn test_clear() {
        let mut set = set_of(1, &[1, 2]);
        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.high_water(), None);
    }
}
