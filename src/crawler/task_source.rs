//! Ordered stream of pages still to harvest

use crate::state::{CrawlTask, PageId};
use crate::tracker::PageTracker;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared marker for the first page found to be past the end of the listing
#[derive(Debug, Clone)]
pub struct EndOfListing(Arc<AtomicU64>);

impl EndOfListing {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(u64::MAX)))
    }

    /// Records `id` as empty; the lowest recorded page wins
    pub fn record(&self, id: PageId) {
        self.0.fetch_min(id.get(), Ordering::SeqCst);
    }

    pub fn get(&self) -> Option<PageId> {
        match self.0.load(Ordering::SeqCst) {
            u64::MAX => None,
            id => Some(PageId(id)),
        }
    }
}

impl Default for EndOfListing {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy ascending sequence of unvisited pages in `first..=last`
///
/// Starts after the tracker's resume point and skips every page the tracker
/// already knows, so a fresh source over the same tracker state yields the
/// same suffix.
pub struct TaskSource {
    tracker: Arc<dyn PageTracker>,
    next: PageId,
    last: PageId,
    end: EndOfListing,
}

impl TaskSource {
    /// Creates a source over `first..=last`
    ///
    /// # Arguments
    ///
    /// * `tracker` - Consulted for the resume point now and for visited pages on every step
    /// * `first` - Lowest page of the listing
    /// * `last` - Highest page to hand out
    ///
    /// # Returns
    ///
    /// A source positioned just past the tracker's resume point when that lies
    /// inside the range, or at `first` otherwise.
    pub fn new(tracker: Arc<dyn PageTracker>, first: PageId, last: PageId) -> Self {
        let next = match tracker.load_resume_point() {
            Some(resume) if resume >= first => resume.next(),
            _ => first,
        };

        Self {
            tracker,
            next,
            last,
            end: EndOfListing::new(),
        }
    }

    /// Handle the workers use to report an empty page
    pub fn end_of_listing(&self) -> EndOfListing {
        self.end.clone()
    }

    /// First page that will be considered, before skipping visited ones
    pub fn start_page(&self) -> PageId {
        self.next
    }

    /// Upper bound of the range
    pub fn last_page(&self) -> PageId {
        self.last
    }
}

impl Iterator for TaskSource {
    type Item = CrawlTask;

    fn next(&mut self) -> Option<CrawlTask> {
        loop {
            if self.next > self.last {
                return None;
            }
            if let Some(end) = self.end.get() {
                if self.next >= end {
                    return None;
                }
            }

            let id = self.next;
            self.next = self.next.next();

            if self.tracker.is_visited(id) {
                continue;
            }
            return Some(CrawlTask::new(id));
        }
    }
}
