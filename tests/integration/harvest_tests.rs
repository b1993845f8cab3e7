//! Integration tests for the harvester
//!
//! These tests use wiremock to serve a small review listing and run the
//! full harvest cycle end-to-end against it.

use review_harvester::config::{parse_config, Config};
use review_harvester::crawler::{run_harvest, HarvestOptions};
use review_harvester::output::{ExitStatus, HaltReason};
use review_harvester::storage::{
    Characteristic, DriveType, FileRepository, Repository, SqliteRepository,
};
use review_harvester::tracker::{FileTracker, PageTracker, SqliteTracker};
use review_harvester::{HarvestError, PageId};
use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn card(link: &str, title: &str) -> String {
    format!(
        r#"<article class="reviews-car-card_i">
             <a class="reviews-cars_name-link" href="/{link}">{title}</a>
             <span class="dupl-number">4.5</span>
             <li class="reviews-car-cardrat-i">
               <div class="reviews-car-card_rat-tit">Надійність</div>
               <strong class="reviews-car-card_rating-val">5</strong>
             </li>
             <span class="reviews-cars__char reviews-cars__type">Подорожі</span>
             <p class="reviews-car-card_desc-i reviews-cars_desc-cont" itemprop="reviewBody">Гарне авто</p>
             <p class="reviews-car-card_desc-i reviews-car-card_plus">керованість, надійність</p>
             <span class="reviews-car-card_author-date reviews-car-card_author-i">12 березня 2023</span>
           </article>"#
    )
}

fn listing(links: &[&str], last_page: u64) -> String {
    let cards: String = links
        .iter()
        .map(|link| card(link, "Toyota Corolla 2019"))
        .collect();
    let pagination: String = (1..=last_page)
        .map(|p| format!(r#"<a class="page-link" href="?page={p}">{p}</a>"#))
        .collect();
    format!(
        r#"<html><body><section class="reviews-cars-list">{cards}</section>
           <nav>{pagination}</nav></body></html>"#
    )
}

async fn serve_page(server: &MockServer, page: u64, body: String) {
    Mock::given(method("GET"))
        .and(path("/uk/reviews/"))
        .and(query_param("page", page.to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

fn sqlite_config(server: &MockServer, db: &Path, extra_target: &str) -> Config {
    parse_config(&format!(
        r#"
        [target]
        base-url = "{}/uk/reviews/"
        {}

        [crawler]
        workers = 2
        delay-min-ms = 0
        delay-max-ms = 0

        [fetch]
        max-attempts = 3
        backoff-base-ms = 5
        backoff-max-ms = 20
        jitter-ms = 0
        timeout-secs = 5

        [storage]
        backend = "sqlite"
        database-path = "{}"
        "#,
        server.uri(),
        extra_target,
        db.display()
    ))
    .expect("test config should be valid")
}

fn file_config(server: &MockServer, dir: &Path) -> Config {
    parse_config(&format!(
        r#"
        [target]
        base-url = "{}/uk/reviews/"

        [crawler]
        workers = 3
        delay-min-ms = 0
        delay-max-ms = 0

        [fetch]
        backoff-base-ms = 5
        backoff-max-ms = 20
        jitter-ms = 0

        [storage]
        backend = "file"
        records-path = "{}"
        tracker-path = "{}"
        "#,
        server.uri(),
        dir.join("reviews.jsonl").display(),
        dir.join("visited.log").display()
    ))
    .expect("test config should be valid")
}

#[tokio::test]
async fn test_full_harvest_then_incremental_rerun() {
    let server = MockServer::start().await;
    serve_page(&server, 1, listing(&["reviews/a/1/", "reviews/a/2/"], 3)).await;
    serve_page(&server, 2, listing(&["reviews/b/1/", "reviews/b/2/"], 3)).await;
    serve_page(&server, 3, listing(&["reviews/c/1/", "reviews/c/2/"], 3)).await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("reviews.db");
    let config = sqlite_config(&server, &db, "");

    let summary = run_harvest(&config, &HarvestOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status(), ExitStatus::Success);
    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.pages_visited, 3);
    assert_eq!(summary.records_saved, 6);

    let repo = SqliteRepository::new(&db).unwrap();
    assert_eq!(repo.count().await.unwrap(), 6);
    let (review, page) = repo.find("reviews/b/2/").unwrap().unwrap();
    assert_eq!(page, PageId(2));
    assert_eq!(review.name, "Toyota Corolla");
    assert_eq!(review.year, 2019);
    assert_eq!(review.total_rating, Some(4.5));
    assert_eq!(review.rating_components.get("Reliability"), Some(&5));
    assert_eq!(review.date, chrono::NaiveDate::from_ymd_opt(2023, 3, 12));

    // Everything is visited: the second run dispatches nothing
    let rerun = run_harvest(&config, &HarvestOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(rerun.dispatched, 0);
    assert_eq!(rerun.status(), ExitStatus::Success);
    assert_eq!(repo.count().await.unwrap(), 6);
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/uk/reviews/"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    serve_page(&server, 1, listing(&["reviews/a/1/"], 2)).await;
    serve_page(&server, 2, listing(&["reviews/b/1/"], 2)).await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("reviews.db");
    let config = sqlite_config(&server, &db, "");

    let summary = run_harvest(&config, &HarvestOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status(), ExitStatus::Success);
    assert_eq!(summary.pages_visited, 2);

    let tracker = SqliteTracker::open(&db, PageId(1)).unwrap();
    assert!(tracker.is_visited(PageId(2)));
}

#[tokio::test]
async fn test_failed_page_stays_unvisited_and_is_retried_next_run() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/uk/reviews/"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .with_priority(1)
        .mount(&server)
        .await;
    serve_page(&server, 1, listing(&["reviews/a/1/"], 3)).await;
    serve_page(&server, 2, listing(&["reviews/b/1/"], 3)).await;
    serve_page(&server, 3, listing(&["reviews/c/1/"], 3)).await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("reviews.db");
    let config = sqlite_config(&server, &db, "");

    let first = run_harvest(&config, &HarvestOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.status(), ExitStatus::PartialFailure);
    assert_eq!(first.failed_pages, vec![PageId(2)]);
    assert_eq!(first.pages_visited, 2);

    let second = run_harvest(&config, &HarvestOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.status(), ExitStatus::Success);
    assert_eq!(second.dispatched, 1);
    assert_eq!(second.pages_visited, 1);

    let tracker = SqliteTracker::open(&db, PageId(1)).unwrap();
    assert_eq!(tracker.load_resume_point(), Some(PageId(3)));
}

#[tokio::test]
async fn test_unreachable_target_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = sqlite_config(&server, &dir.path().join("reviews.db"), "");

    let result = run_harvest(&config, &HarvestOptions::default(), CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(HarvestError::TargetUnreachable { .. })
    ));
}

#[tokio::test]
async fn test_cancel_during_discovery_is_not_fatal() {
    let server = MockServer::start().await;
    serve_page(&server, 1, listing(&["reviews/a/1/"], 2)).await;

    let dir = TempDir::new().unwrap();
    let config = sqlite_config(&server, &dir.path().join("reviews.db"), "");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = run_harvest(&config, &HarvestOptions::default(), cancel)
        .await
        .unwrap();

    assert_eq!(summary.halt_reason, Some(HaltReason::Cancelled));
    assert_eq!(summary.dispatched, 0);
    assert_eq!(summary.status(), ExitStatus::PartialFailure);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_configured_last_page_skips_discovery() {
    let server = MockServer::start().await;
    serve_page(&server, 1, listing(&["reviews/a/1/"], 9)).await;
    serve_page(&server, 2, listing(&["reviews/b/1/"], 9)).await;

    let dir = TempDir::new().unwrap();
    let config = sqlite_config(&server, &dir.path().join("reviews.db"), "last-page = 2");

    let summary = run_harvest(&config, &HarvestOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.pages_visited, 2);
    // One request per page, none for discovery
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_file_backend_harvest() {
    let server = MockServer::start().await;
    serve_page(&server, 1, listing(&["reviews/a/1/", "reviews/a/2/"], 2)).await;
    serve_page(&server, 2, listing(&["reviews/b/1/"], 2)).await;

    let dir = TempDir::new().unwrap();
    let config = file_config(&server, dir.path());

    let summary = run_harvest(&config, &HarvestOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.status(), ExitStatus::Success);
    assert_eq!(summary.records_saved, 3);

    let repo = FileRepository::open(&dir.path().join("reviews.jsonl")).unwrap();
    let stored = repo.load_all().await.unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored
        .iter()
        .any(|r| r.review.link == "reviews/b/1/" && r.source_page == PageId(2)));
    assert_eq!(stored[0].review.drive_type, Some(DriveType::Travel));
    assert_eq!(stored[0].review.pros, vec![Characteristic::Handling]);
    assert_eq!(
        stored[0].review.pros_text.as_deref(),
        Some("керованість, надійність")
    );

    let tracker = FileTracker::open(&dir.path().join("visited.log"), PageId(1)).unwrap();
    assert_eq!(tracker.visited_pages(), vec![PageId(1), PageId(2)]);
    assert_eq!(tracker.total_pages(), Some(2));
}

#[tokio::test]
async fn test_listing_growth_keeps_old_pages_visited() {
    let server = MockServer::start().await;
    serve_page(&server, 1, listing(&["reviews/old/1/"], 2)).await;
    serve_page(&server, 2, listing(&["reviews/old/2/"], 2)).await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("reviews.db");
    let config = sqlite_config(&server, &db, "");

    let first = run_harvest(&config, &HarvestOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.pages_visited, 2);

    // A new page of reviews is published at the front of the listing
    server.reset().await;
    serve_page(&server, 1, listing(&["reviews/new/1/"], 3)).await;
    serve_page(&server, 2, listing(&["reviews/old/1/"], 3)).await;
    serve_page(&server, 3, listing(&["reviews/old/2/"], 3)).await;

    let second = run_harvest(&config, &HarvestOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.dispatched, 1);
    assert_eq!(second.records_saved, 1);

    let tracker = SqliteTracker::open(&db, PageId(1)).unwrap();
    assert_eq!(
        tracker.visited_pages(),
        vec![PageId(1), PageId(2), PageId(3)]
    );
    assert_eq!(tracker.total_pages(), Some(3));
}

#[tokio::test]
async fn test_fresh_run_harvests_everything_again() {
    let server = MockServer::start().await;
    serve_page(&server, 1, listing(&["reviews/a/1/"], 2)).await;
    serve_page(&server, 2, listing(&["reviews/b/1/"], 2)).await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("reviews.db");
    let config = sqlite_config(&server, &db, "");

    run_harvest(&config, &HarvestOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    let fresh = run_harvest(
        &config,
        &HarvestOptions { fresh: true },
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(fresh.dispatched, 2);
    assert_eq!(fresh.status(), ExitStatus::Success);

    // Re-harvested rows are refreshed, not duplicated
    let repo = SqliteRepository::new(&db).unwrap();
    assert_eq!(repo.count().await.unwrap(), 2);
}
