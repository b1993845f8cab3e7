//! Page identity and crawl tasks

use serde::{Deserialize, Serialize};
use std::fmt;

/// Listing page number; ascending order is dispatch order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u64);

impl PageId {
    pub fn get(self) -> u64 {
        self.0
    }

    /// The following page
    pub fn next(self) -> PageId {
        PageId(self.0 + 1)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageId {
    fn from(value: u64) -> Self {
        PageId(value)
    }
}

/// One unit of crawl work handed to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlTask {
    pub id: PageId,
    pub attempt: u32,
}

impl CrawlTask {
    pub fn new(id: PageId) -> Self {
        Self { id, attempt: 0 }
    }
}
