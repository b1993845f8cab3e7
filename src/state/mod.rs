//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `PageId`: identifies one listing page
//! - `CrawlTask`: a page handed to a worker
//! - `TaskStage`: where a task is in the fetch/parse/persist/mark pipeline

mod page;
mod task_stage;

// Re-export main types
pub use page::{CrawlTask, PageId};
pub use task_stage::TaskStage;
