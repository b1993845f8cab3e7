//! Review-Harvester main entry point
//!
//! This is the command-line interface for the incremental review harvester.

use anyhow::Context;
use clap::Parser;
use review_harvester::config::{load_config_with_hash, Config, StorageBackend};
use review_harvester::crawler::{plan_harvest, run_harvest, HarvestOptions};
use review_harvester::output::{load_statistics, print_statistics, ExitStatus};
use review_harvester::storage::open_repository;
use review_harvester::tracker::open_tracker;
use review_harvester::PageId;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Review-Harvester: incremental harvester for paginated review listings
///
/// Pages already harvested by earlier runs are skipped, failed pages are
/// retried on the next run, and every saved review is durable before its
/// page is marked done.
#[derive(Parser, Debug)]
#[command(name = "review-harvester")]
#[command(version)]
#[command(about = "Incremental review listing harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Forget visited pages and harvest from the first page again
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    fresh: bool,

    /// Validate config and show which pages would be harvested
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show harvest statistics and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let status = match run(cli).await {
        Ok(status) => status,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitStatus::FatalError
        }
    };

    std::process::exit(status.code());
}

async fn run(cli: Cli) -> anyhow::Result<ExitStatus> {
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)?;
        Ok(ExitStatus::Success)
    } else if cli.stats {
        handle_stats(&config).await?;
        Ok(ExitStatus::Success)
    } else {
        handle_harvest(config, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("review_harvester=info,warn"),
            1 => EnvFilter::new("review_harvester=debug,info"),
            2 => EnvFilter::new("review_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows the pages a run would take
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Review-Harvester Dry Run ===\n");

    println!("Target:");
    println!("  Base URL: {}", config.target.base_url);
    println!("  Page parameter: {}", config.target.page_query);
    println!("  First page: {}", config.target.first_page);
    match config.target.last_page {
        Some(last) => println!("  Last page: {}", last),
        None => println!("  Last page: discovered from the first listing page"),
    }
    if let Some(max) = config.target.max_pages {
        println!("  Max pages per run: {}", max);
    }

    println!("\nCrawler:");
    println!("  Workers: {}", config.crawler.workers);
    println!(
        "  Circuit breaker: {} consecutive, or > {:.0}% of the last {}",
        config.crawler.failure_threshold,
        config.crawler.failure_rate * 100.0,
        config.crawler.failure_window
    );
    println!(
        "  Delay between pages: {}-{}ms",
        config.crawler.delay_min_ms, config.crawler.delay_max_ms
    );

    println!("\nFetch:");
    println!("  Max attempts: {}", config.fetch.max_attempts);
    println!(
        "  Backoff: {}ms doubling, capped at {}ms, jitter ±{}ms",
        config.fetch.backoff_base_ms, config.fetch.backoff_max_ms, config.fetch.jitter_ms
    );

    println!("\nStorage:");
    match config.storage.backend {
        StorageBackend::Sqlite => {
            println!("  Backend: sqlite");
            println!(
                "  Database: {}",
                config.storage.database_path.as_deref().unwrap_or_default()
            );
        }
        StorageBackend::File => {
            println!("  Backend: file");
            println!(
                "  Records: {}",
                config.storage.records_path.as_deref().unwrap_or_default()
            );
            println!(
                "  Tracker: {}",
                config.storage.tracker_path.as_deref().unwrap_or_default()
            );
        }
    }

    let plan = plan_harvest(config)?;
    println!();
    match plan.resume_point {
        Some(page) => println!("Resume point: page {}", page),
        None => println!("Resume point: none"),
    }

    println!("\n✓ Configuration is valid");
    if plan.last.is_some() {
        println!(
            "✓ Would harvest {} page(s): {}",
            plan.pending.len(),
            format_pages(&plan.pending)
        );
    } else {
        println!("✓ Would discover the listing size, then harvest unvisited pages");
    }

    Ok(())
}

/// Compresses runs of consecutive pages: 1-3, 5, 7-9
fn format_pages(pages: &[PageId]) -> String {
    let mut parts = Vec::new();
    let mut iter = pages.iter().map(|p| p.get()).peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
    }
    parts.join(", ")
}

/// Handles the --stats mode: shows tracker and repository statistics
async fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let tracker = open_tracker(&config.storage, PageId(config.target.first_page))?;
    let repository = open_repository(&config.storage)?;

    let stats = load_statistics(tracker.as_ref(), repository.as_ref()).await?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, fresh: bool) -> anyhow::Result<ExitStatus> {
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight pages");
            ctrl_c.cancel();
        }
    });

    let options = HarvestOptions { fresh };
    let summary = run_harvest(&config, &options, cancel).await?;

    Ok(summary.status())
}
