//! Harvest coordinator - worker pool orchestration
//!
//! This module contains the dispatch loop that coordinates the harvest:
//! - Pulling pages from the task source in ascending order
//! - Bounding concurrency with a semaphore of `W` permits
//! - Running Fetch → Parse → Persist → Mark for each page
//! - Tripping the circuit breaker and honoring cancellation
//!
//! A worker records its outcome before giving its permit back, so the
//! dispatcher always sees every finished task when it decides whether to
//! hand out the next one.

use crate::config::CrawlerConfig;
use crate::crawler::breaker::{BreakerConfig, CircuitBreaker};
use crate::crawler::fetcher::{FailureKind, FetchResult, Fetcher};
use crate::crawler::parser::Parser;
use crate::crawler::task_source::{EndOfListing, TaskSource};
use crate::crawler::ListingUrls;
use crate::output::{HaltReason, RunSummary};
use crate::state::{CrawlTask, PageId, TaskStage};
use crate::storage::Repository;
use crate::tracker::PageTracker;
use crate::HarvestError;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Worker pool settings
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorOptions {
    pub workers: usize,
    pub breaker: BreakerConfig,
    /// Randomized pause each worker takes after a task
    pub delay_min: Duration,
    pub delay_max: Duration,
}

impl CoordinatorOptions {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            workers: config.workers as usize,
            breaker: BreakerConfig::from_config(config),
            delay_min: Duration::from_millis(config.delay_min_ms),
            delay_max: Duration::from_millis(config.delay_max_ms),
        }
    }

    fn politeness_delay(&self) -> Duration {
        if self.delay_max <= self.delay_min {
            return self.delay_min;
        }
        let millis = rand::thread_rng()
            .gen_range(self.delay_min.as_millis() as u64..=self.delay_max.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

/// How a single task ended
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Records persisted and page marked visited
    Done { records: usize },
    /// The page parsed to zero records: the listing ends here
    Empty,
    /// Abandoned for this run; the page stays unvisited
    Failed { stage: TaskStage, reason: String },
    /// Stopped by cancellation before anything was persisted
    Cancelled,
}

/// Shared run bookkeeping, only touched between await points
struct RunState {
    breaker: CircuitBreaker,
    in_flight: HashSet<PageId>,
    summary: RunSummary,
}

impl RunState {
    fn record(&mut self, id: PageId, outcome: &TaskOutcome) {
        self.in_flight.remove(&id);

        match outcome {
            TaskOutcome::Done { records } => {
                self.summary.pages_visited += 1;
                self.summary.records_saved += *records as u64;
                self.breaker.record_success();

                if self.summary.pages_visited % 10 == 0 {
                    tracing::info!(
                        "Progress: {} pages harvested, {} reviews saved",
                        self.summary.pages_visited,
                        self.summary.records_saved
                    );
                }
            }
            TaskOutcome::Empty => {
                self.summary.pages_empty += 1;
            }
            TaskOutcome::Failed { .. } => {
                self.summary.failed_pages.push(id);
                if let Some(trip) = self.breaker.record_failure() {
                    tracing::error!("Circuit breaker opened after page {}: {}", id, trip);
                }
            }
            TaskOutcome::Cancelled => {}
        }
    }
}

/// Everything a worker needs, shared across all of them
struct WorkerContext {
    fetcher: Fetcher,
    parser: Arc<dyn Parser>,
    repository: Arc<dyn Repository>,
    tracker: Arc<dyn PageTracker>,
    urls: ListingUrls,
}

/// Main harvest coordinator structure
pub struct Coordinator {
    ctx: Arc<WorkerContext>,
    options: CoordinatorOptions,
}

impl Coordinator {
    pub fn new(
        fetcher: Fetcher,
        parser: Arc<dyn Parser>,
        repository: Arc<dyn Repository>,
        tracker: Arc<dyn PageTracker>,
        urls: ListingUrls,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            ctx: Arc::new(WorkerContext {
                fetcher,
                parser,
                repository,
                tracker,
                urls,
            }),
            options,
        }
    }

    /// Runs the dispatch loop until the source is exhausted or the run halts
    ///
    /// # Arguments
    ///
    /// * `source` - Pages to dispatch, in ascending order
    /// * `cancel` - Stops dispatch when triggered; in-flight pages still finish
    ///
    /// # Returns
    ///
    /// A `RunSummary` once every dispatched worker has reported back. Why the
    /// run halted, if it did, is recorded in `halt_reason`.
    pub async fn run(&self, mut source: TaskSource, cancel: &CancellationToken) -> RunSummary {
        let workers = self.options.workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let end = source.end_of_listing();
        let state = Arc::new(Mutex::new(RunState {
            breaker: CircuitBreaker::new(self.options.breaker.clone()),
            in_flight: HashSet::new(),
            summary: RunSummary::default(),
        }));
        let mut tasks = JoinSet::new();
        let mut halt_reason = None;

        tracing::info!(
            "Dispatching pages {}..={} to {} worker(s)",
            source.start_page(),
            source.last_page(),
            workers
        );

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    halt_reason = Some(HaltReason::Cancelled);
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if cancel.is_cancelled() {
                halt_reason = Some(HaltReason::Cancelled);
                break;
            }

            let task = {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(trip) = state.breaker.trip() {
                    halt_reason = Some(HaltReason::CircuitOpen(trip));
                    break;
                }

                let Some(task) = source.next() else {
                    break;
                };
                if !state.in_flight.insert(task.id) {
                    tracing::error!("Page {} is already in flight, not dispatching it twice", task.id);
                    continue;
                }
                state.summary.dispatched += 1;
                task
            };

            tracing::debug!("Dispatching page {}", task.id);

            let ctx = self.ctx.clone();
            let state = state.clone();
            let end = end.clone();
            let cancel = cancel.clone();
            let options = self.options.clone();
            tasks.spawn(async move {
                let outcome = process_task(&ctx, task, &end, &cancel).await;
                state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record(task.id, &outcome);

                if matches!(outcome, TaskOutcome::Done { .. }) {
                    let delay = options.politeness_delay();
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                drop(permit);
            });
        }

        if let Some(reason) = &halt_reason {
            tracing::warn!("Stopping dispatch: {}", reason);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker task failed: {}", e);
            }
        }

        let mut summary = {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut state.summary)
        };
        summary.failed_pages.sort();
        summary.halt_reason = halt_reason;
        summary.end_of_listing = end.get();
        summary
    }
}

/// Runs one page through the pipeline
async fn process_task(
    ctx: &WorkerContext,
    task: CrawlTask,
    end: &EndOfListing,
    cancel: &CancellationToken,
) -> TaskOutcome {
    let mut stage = TaskStage::Pending;
    match pipeline(ctx, task, end, cancel, &mut stage).await {
        Ok(outcome) => outcome,
        Err(reason) => {
            tracing::warn!(
                "Page {} failed while {}: {}",
                task.id,
                stage.as_str(),
                reason
            );
            TaskOutcome::Failed { stage, reason }
        }
    }
}

fn enter(stage: &mut TaskStage, next: TaskStage) -> Result<(), String> {
    *stage = stage
        .advance(next)
        .map_err(|e: HarvestError| e.to_string())?;
    Ok(())
}

async fn pipeline(
    ctx: &WorkerContext,
    task: CrawlTask,
    end: &EndOfListing,
    cancel: &CancellationToken,
    stage: &mut TaskStage,
) -> Result<TaskOutcome, String> {
    let id = task.id;

    enter(stage, TaskStage::Fetching)?;
    let url = ctx.urls.page(id);
    let content = match ctx.fetcher.fetch(id, &url, cancel).await {
        FetchResult::Success { content, .. } => content,
        FetchResult::Failure {
            kind: FailureKind::Cancelled,
            ..
        } => return Ok(TaskOutcome::Cancelled),
        FetchResult::Failure { kind, attempts, .. } => {
            return Err(format!("{} after {} attempt(s)", kind, attempts));
        }
    };

    enter(stage, TaskStage::Parsing)?;
    let parser = ctx.parser.clone();
    let parsed = tokio::task::spawn_blocking(move || {
        parser
            .parse(&content)
            .map_err(|e| (e, content_hash(&content)))
    })
    .await
    .map_err(|e| format!("parser task failed: {}", e))?;

    let records = match parsed {
        Ok(records) => records,
        Err((e, hash)) => return Err(format!("{} (content sha256 {})", e, hash)),
    };

    if records.is_empty() {
        tracing::info!("Page {} has no reviews, treating it as the end of the listing", id);
        end.record(id);
        return Ok(TaskOutcome::Empty);
    }

    enter(stage, TaskStage::Persisting)?;
    ctx.repository
        .save(id, &records)
        .await
        .map_err(|e| e.to_string())?;

    // Marking runs to completion even if the run is cancelled meanwhile
    enter(stage, TaskStage::Marking)?;
    let tracker = ctx.tracker.clone();
    tokio::task::spawn_blocking(move || tracker.mark_visited(id))
        .await
        .map_err(|e| format!("tracker task failed: {}", e))?
        .map_err(|e| e.to_string())?;

    enter(stage, TaskStage::Done)?;
    tracing::debug!("Page {}: {} reviews saved", id, records.len());
    Ok(TaskOutcome::Done {
        records: records.len(),
    })
}

/// Hex SHA-256 of fetched content, logged with parse failures
fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
