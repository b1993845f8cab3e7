//! Crawler module for listing page harvesting
//!
//! This module contains the core harvesting logic, including:
//! - HTTP fetching with retry and backoff
//! - Review extraction from listing pages
//! - The ordered, resumable task source
//! - Worker pool coordination and the circuit breaker

mod backoff;
mod breaker;
mod coordinator;
mod dates;
mod fetcher;
mod parser;
mod task_source;

pub use backoff::BackoffPolicy;
pub use breaker::{BreakerConfig, CircuitBreaker, Trip};
pub use coordinator::{Coordinator, CoordinatorOptions, TaskOutcome};
pub use dates::parse_review_date;
pub use fetcher::{
    build_http_client, parse_retry_after, FailureKind, FetchResult, Fetcher, HttpTransport,
    RawResponse, Transport, TransportError,
};
pub use parser::{ParseError, Parser, ReviewListingParser};
pub use task_source::{EndOfListing, TaskSource};

use crate::config::Config;
use crate::output::{HaltReason, RunSummary};
use crate::state::PageId;
use crate::storage::open_repository;
use crate::tracker::{open_tracker, PageTracker};
use crate::HarvestError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Builds listing page URLs: `base?<page_query>=N`
#[derive(Debug, Clone)]
pub struct ListingUrls {
    base: Url,
    page_query: String,
}

impl ListingUrls {
    pub fn new(base_url: &str, page_query: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            base: Url::parse(base_url)?,
            page_query: page_query.to_string(),
        })
    }

    /// URL of listing page `id`; any page parameter already on the base is replaced
    pub fn page(&self, id: PageId) -> String {
        let mut url = self.base.clone();
        let kept: Vec<(String, String)> = self
            .base
            .query_pairs()
            .filter(|(key, _)| *key != self.page_query)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(&self.page_query, &id.to_string());
        url.into()
    }
}

/// Run-level switches coming from the command line
#[derive(Debug, Clone, Default)]
pub struct HarvestOptions {
    /// Forget previously visited pages before starting
    pub fresh: bool,
}

/// Pages a run would work through
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestPlan {
    pub first: PageId,
    pub resume_point: Option<PageId>,
    /// Configured or capped upper bound; `None` until discovered online
    pub last: Option<PageId>,
    /// Unvisited pages in range, when the upper bound is known
    pub pending: Vec<PageId>,
}

/// Works out the run's page range without touching the network
pub fn plan_harvest(config: &Config) -> Result<HarvestPlan, HarvestError> {
    let first = PageId(config.target.first_page);
    let tracker = open_tracker(&config.storage, first)?;

    let last = config
        .target
        .last_page
        .map(|last| cap_last_page(config, tracker.as_ref(), PageId(last)));
    let pending = match last {
        Some(last) => TaskSource::new(tracker.clone(), first, last)
            .map(|task| task.id)
            .collect(),
        None => Vec::new(),
    };

    Ok(HarvestPlan {
        first,
        resume_point: tracker.load_resume_point(),
        last,
        pending,
    })
}

/// Applies `max-pages`, counted from where this run resumes
fn cap_last_page(config: &Config, tracker: &dyn PageTracker, last: PageId) -> PageId {
    let first = PageId(config.target.first_page);
    let Some(max_pages) = config.target.max_pages else {
        return last;
    };

    let start = match tracker.load_resume_point() {
        Some(resume) if resume >= first => resume.next(),
        _ => first,
    };
    last.min(PageId(start.get() + max_pages.saturating_sub(1)))
}

/// Runs a complete harvest
///
/// This is the main entry point for a run. It will:
/// 1. Open the tracker and repository selected by the config
/// 2. Determine the last listing page (configured, or discovered online)
/// 3. Shift visited pages if the listing grew since the last run
/// 4. Dispatch unvisited pages to the worker pool until done or halted
///
/// # Arguments
///
/// * `config` - The validated configuration
/// * `options` - Run-level switches from the command line
/// * `cancel` - Cancelling stops dispatch; in-flight pages finish or stop at
///   their next retry boundary
///
/// # Returns
///
/// A `RunSummary` whose `status()` tells success from partial failure.
/// Per-page failures are reported there, not as errors.
///
/// # Errors
///
/// Only fatal conditions that happen before any dispatch: an unopenable
/// store, an invalid base URL, or a listing that cannot be reached during
/// discovery.
pub async fn run_harvest(
    config: &Config,
    options: &HarvestOptions,
    cancel: CancellationToken,
) -> Result<RunSummary, HarvestError> {
    let first = PageId(config.target.first_page);
    let urls = ListingUrls::new(&config.target.base_url, &config.target.page_query)?;

    let tracker = open_tracker(&config.storage, first)?;
    let repository = open_repository(&config.storage)?;

    if options.fresh {
        tracing::info!("Fresh run: clearing visited pages");
        tracker.reset()?;
    }

    let transport = Arc::new(HttpTransport::new(&config.fetch)?);
    let fetcher = Fetcher::new(transport, BackoffPolicy::from_config(&config.fetch));
    let parser: Arc<dyn Parser> = Arc::new(ReviewListingParser::new()?);

    let last = match config.target.last_page {
        Some(last) => PageId(last),
        None => {
            let Some(total) =
                discover_last_page(&fetcher, parser.as_ref(), &urls, first, &cancel).await?
            else {
                tracing::warn!("Cancelled during listing discovery, nothing dispatched");
                let summary = RunSummary {
                    halt_reason: Some(HaltReason::Cancelled),
                    ..RunSummary::default()
                };
                summary.log();
                return Ok(summary);
            };
            if config.crawler.track_listing_growth {
                apply_listing_growth(tracker.as_ref(), total.get())?;
            }
            total
        }
    };
    let last = cap_last_page(config, tracker.as_ref(), last);

    tracing::info!(
        "Harvesting pages {}..={} ({} already visited, resume point: {:?})",
        first,
        last,
        tracker.visited_count(),
        tracker.load_resume_point()
    );

    let coordinator = Coordinator::new(
        fetcher,
        parser,
        repository,
        tracker.clone(),
        urls,
        CoordinatorOptions::from_config(&config.crawler),
    );
    let source = TaskSource::new(tracker, first, last);
    let summary = coordinator.run(source, &cancel).await;
    summary.log();

    Ok(summary)
}

/// Reads the listing size off the first page's pagination bar
///
/// # Returns
///
/// * `Ok(Some(last))` - The last page, or `first` if no page count is shown
/// * `Ok(None)` - The run was cancelled before the page arrived
async fn discover_last_page(
    fetcher: &Fetcher,
    parser: &dyn Parser,
    urls: &ListingUrls,
    first: PageId,
    cancel: &CancellationToken,
) -> Result<Option<PageId>, HarvestError> {
    let url = urls.page(first);
    tracing::info!("Discovering listing size from {}", url);

    match fetcher.fetch(first, &url, cancel).await {
        FetchResult::Success { content, .. } => match parser.last_page(&content) {
            Some(last) if last >= first => {
                tracing::info!("Listing has {} pages", last);
                Ok(Some(last))
            }
            _ => {
                tracing::warn!("Could not determine total pages, harvesting page {} only", first);
                Ok(Some(first))
            }
        },
        FetchResult::Failure {
            kind: FailureKind::Cancelled,
            ..
        } => Ok(None),
        FetchResult::Failure { kind, attempts, .. } => {
            tracing::error!("Listing unreachable at {}: {}", url, kind);
            Err(HarvestError::TargetUnreachable {
                url,
                reason: format!("{} after {} attempt(s)", kind, attempts),
            })
        }
    }
}

/// Keeps visited ids pointing at the same content on a newest-first listing
///
/// When `k` pages were added since the last run, everything seen before now
/// sits `k` pages further back. The new size and the shift are committed as
/// one tracker write, so a crash can never record the size without the shift.
fn apply_listing_growth(tracker: &dyn PageTracker, total: u64) -> Result<(), HarvestError> {
    match tracker.total_pages() {
        Some(previous) if total > previous && tracker.visited_count() > 0 => {
            let delta = total - previous;
            tracing::info!(
                "Listing grew from {} to {} pages, shifting visited pages by {}",
                previous,
                total,
                delta
            );
            tracker.record_growth(total, delta)?;
        }
        _ => tracker.store_total_pages(total)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::tracker::SqliteTracker;

    #[test]
    fn test_listing_urls() {
        let urls = ListingUrls::new("https://auto.ria.com/uk/reviews/", "page").unwrap();
        assert_eq!(
            urls.page(PageId(3)),
            "https://auto.ria.com/uk/reviews/?page=3"
        );
    }

    #[test]
    fn test_listing_urls_keep_other_parameters() {
        let urls = ListingUrls::new("https://example.com/list?sort=new&page=9", "page").unwrap();
        assert_eq!(
            urls.page(PageId(2)),
            "https://example.com/list?sort=new&page=2"
        );
    }

    #[test]
    fn test_listing_growth_shifts_visited_pages() {
        let tracker = SqliteTracker::open_in_memory(PageId(1)).unwrap();
        apply_listing_growth(&tracker, 10).unwrap();
        for id in 1..=3 {
            tracker.mark_visited(PageId(id)).unwrap();
        }

        apply_listing_growth(&tracker, 12).unwrap();

        assert_eq!(tracker.total_pages(), Some(12));
        assert_eq!(
            tracker.visited_pages(),
            vec![PageId(3), PageId(4), PageId(5)]
        );
    }

    #[test]
    fn test_growth_is_durable_and_frees_new_pages() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("reviews.db");

        {
            let tracker = SqliteTracker::open(&db, PageId(1)).unwrap();
            tracker.store_total_pages(10).unwrap();
            for id in 1..=3 {
                tracker.mark_visited(PageId(id)).unwrap();
            }
        }

        // The listing has grown to 12 pages by the next run
        let tracker = SqliteTracker::open(&db, PageId(1)).unwrap();
        apply_listing_growth(&tracker, 12).unwrap();
        drop(tracker);

        let tracker: Arc<dyn PageTracker> = Arc::new(SqliteTracker::open(&db, PageId(1)).unwrap());
        assert_eq!(tracker.total_pages(), Some(12));
        assert_eq!(
            tracker.visited_pages(),
            vec![PageId(3), PageId(4), PageId(5)]
        );

        // Pages 1 and 2 now hold the new reviews and are harvested
        let pending: Vec<u64> = TaskSource::new(tracker, PageId(1), PageId(12))
            .map(|task| task.id.get())
            .collect();
        assert_eq!(pending, vec![1, 2, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_first_listing_size_is_stored_without_shift() {
        let tracker = SqliteTracker::open_in_memory(PageId(1)).unwrap();
        tracker.mark_visited(PageId(1)).unwrap();

        apply_listing_growth(&tracker, 7).unwrap();

        assert_eq!(tracker.total_pages(), Some(7));
        assert_eq!(tracker.visited_pages(), vec![PageId(1)]);
    }

    #[test]
    fn test_listing_shrink_does_not_shift() {
        let tracker = SqliteTracker::open_in_memory(PageId(1)).unwrap();
        tracker.store_total_pages(10).unwrap();
        tracker.mark_visited(PageId(1)).unwrap();

        apply_listing_growth(&tracker, 8).unwrap();

        assert_eq!(tracker.total_pages(), Some(8));
        assert_eq!(tracker.visited_pages(), vec![PageId(1)]);
    }

    fn config_with(extra_target: &str, db: &std::path::Path) -> Config {
        parse_config(&format!(
            r#"
            [target]
            base-url = "https://example.com/reviews/"
            {}

            [storage]
            backend = "sqlite"
            database-path = "{}"
            "#,
            extra_target,
            db.display()
        ))
        .unwrap()
    }

    #[test]
    fn test_plan_with_configured_last_page() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("reviews.db");
        {
            let tracker = SqliteTracker::open(&db, PageId(1)).unwrap();
            tracker.mark_visited(PageId(1)).unwrap();
            tracker.mark_visited(PageId(3)).unwrap();
        }

        let plan = plan_harvest(&config_with("last-page = 5", &db)).unwrap();

        assert_eq!(plan.resume_point, Some(PageId(1)));
        assert_eq!(plan.last, Some(PageId(5)));
        assert_eq!(plan.pending, vec![PageId(2), PageId(4), PageId(5)]);
    }

    #[test]
    fn test_plan_caps_pages_from_resume_point() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("reviews.db");
        {
            let tracker = SqliteTracker::open(&db, PageId(1)).unwrap();
            tracker.mark_visited(PageId(1)).unwrap();
            tracker.mark_visited(PageId(2)).unwrap();
        }

        let plan = plan_harvest(&config_with("last-page = 50\nmax-pages = 3", &db)).unwrap();

        assert_eq!(plan.last, Some(PageId(5)));
        assert_eq!(plan.pending, vec![PageId(3), PageId(4), PageId(5)]);
    }

    #[test]
    fn test_plan_without_last_page() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_harvest(&config_with("", &dir.path().join("reviews.db"))).unwrap();
        assert_eq!(plan.last, None);
        assert!(plan.pending.is_empty());
    }
}
