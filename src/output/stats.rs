//! Statistics from the tracker and repository
//!
//! Backs the `--stats` mode: how far the harvest has got and how many
//! reviews are stored.

use crate::state::PageId;
use crate::storage::{Repository, StorageResult};
use crate::tracker::PageTracker;

/// Harvest progress summary
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestStatistics {
    pub visited_pages: u64,

    /// Every page up to here is harvested
    pub resume_point: Option<PageId>,

    /// Visited pages beyond the resume point (gaps left by failures)
    pub visited_beyond_resume: u64,

    /// Listing size seen by the last run
    pub known_total_pages: Option<u64>,

    pub stored_reviews: u64,
}

/// Loads statistics from the tracker and repository
///
/// # Arguments
///
/// * `tracker` - Source of the visited set, resume point and known listing size
/// * `repository` - Counted for the number of stored reviews
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - A snapshot of the persisted harvest state
/// * `Err(StorageError)` - The repository could not be counted
pub async fn load_statistics(
    tracker: &dyn PageTracker,
    repository: &dyn Repository,
) -> StorageResult<HarvestStatistics> {
    let resume_point = tracker.load_resume_point();
    let visited = tracker.visited_pages();
    let visited_beyond_resume = match resume_point {
        Some(resume) => visited.iter().filter(|&&id| id > resume).count() as u64,
        None => visited.len() as u64,
    };

    Ok(HarvestStatistics {
        visited_pages: visited.len() as u64,
        resume_point,
        visited_beyond_resume,
        known_total_pages: tracker.total_pages(),
        stored_reviews: repository.count().await?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Pages:");
    println!("  Visited: {}", stats.visited_pages);
    match stats.resume_point {
        Some(page) => println!("  Resume point: page {}", page),
        None => println!("  Resume point: none (starts from the first page)"),
    }
    if stats.visited_beyond_resume > 0 {
        println!(
            "  Visited past the resume point: {}",
            stats.visited_beyond_resume
        );
    }
    if let Some(total) = stats.known_total_pages {
        let percentage = if total > 0 {
            (stats.visited_pages as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("  Listing size at last run: {} ({:.1}% visited)", total, percentage);
    }
    println!();

    println!("Reviews:");
    println!("  Stored: {}", stats.stored_reviews);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Review, SqliteRepository};
    use crate::tracker::SqliteTracker;

    #[tokio::test]
    async fn test_load_statistics() {
        let tracker = SqliteTracker::open_in_memory(PageId(1)).unwrap();
        for id in [1, 2, 3, 6] {
            tracker.mark_visited(PageId(id)).unwrap();
        }
        tracker.store_total_pages(10).unwrap();

        let repository = SqliteRepository::new_in_memory().unwrap();
        repository
            .save(
                PageId(1),
                &[
                    Review::new("reviews/a/1/", "A", 2020),
                    Review::new("reviews/b/2/", "B", 2021),
                ],
            )
            .await
            .unwrap();

        let stats = load_statistics(&tracker, &repository).await.unwrap();
        assert_eq!(
            stats,
            HarvestStatistics {
                visited_pages: 4,
                resume_point: Some(PageId(3)),
                visited_beyond_resume: 1,
                known_total_pages: Some(10),
                stored_reviews: 2,
            }
        );
    }
}
