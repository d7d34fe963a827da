//! End-to-end catch-up cycles against mocked remote sources.
//!
//! Concurrency tests use a file-backed database in a temp directory so that
//! independent pools really share one store, the way two processes would.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use tidemark::config::Config;
use tidemark::sources::SourceRegistry;
use tidemark::storage::{Database, QueryFilter, SourceUpdate};
use tidemark::sync::{CycleStatus, HighWaterMark, Synchronizer};
use tidemark::transport::Transport;

const LATEST: i64 = 6;

/// Answers `/{n}/info.0.json` with comic `n`.
struct ComicResponder;

impl Respond for ComicResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let num: i64 = request
            .url
            .path()
            .trim_start_matches('/')
            .split('/')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        ResponseTemplate::new(200).set_body_json(json!({
            "num": num,
            "year": "2021",
            "month": "7",
            "day": num.to_string(),
            "title": format!("Comic {num}"),
            "img": format!("https://imgs.example.com/{num}.png"),
            "alt": "",
        }))
    }
}

async fn mock_comics(server: &MockServer, expected_item_calls: std::ops::RangeInclusive<u64>) {
    Mock::given(method("GET"))
        .and(path("/info.0.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "num": LATEST })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/\d+/info\.0\.json$"))
        .respond_with(ComicResponder)
        .expect(expected_item_calls)
        .mount(server)
        .await;
}

fn registry(server: &MockServer) -> Arc<SourceRegistry> {
    let mut config = Config::default();
    for settings in config.sources.values_mut() {
        settings.base_url = server.uri();
    }
    config.sources.get_mut("comics").unwrap().batch_size = Some(2);
    Arc::new(SourceRegistry::from_config(&config).unwrap())
}

async fn file_db(dir: &TempDir, registry: &SourceRegistry) -> Database {
    let path = dir.path().join("cache.db");
    let db = Database::open(path.to_str().unwrap()).await.unwrap();
    db.seed_sources(&registry.seeds()).await.unwrap();
    db
}

fn synchronizer(db: Database, registry: Arc<SourceRegistry>) -> Synchronizer {
    Synchronizer::new(db, Transport::build("tidemark-test", 4).unwrap(), registry)
}

async fn stored(db: &Database, slug: &str) -> Vec<i64> {
    let id = db.get_source(slug).await.unwrap().id;
    db.get_from_cache(id, &QueryFilter::default().with_limit(1000))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.item_index)
        .collect()
}

// ============================================================================
// Concurrent cycles
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_cycles_share_lock() {
    let server = MockServer::start().await;
    // Every item fetched exactly once: the second cycle waits, then sees no gap
    mock_comics(&server, LATEST as u64..=LATEST as u64).await;
    let dir = TempDir::new().unwrap();
    let registry = registry(&server);
    let sync = synchronizer(file_db(&dir, &registry).await, registry);

    let (first, second) = tokio::join!(
        tokio::spawn({
            let sync = sync.clone();
            async move { sync.update_cache("comics").await }
        }),
        tokio::spawn({
            let sync = sync.clone();
            async move { sync.update_cache("comics").await }
        }),
    );
    let mut statuses = vec![
        first.unwrap().unwrap().status,
        second.unwrap().unwrap().status,
    ];
    statuses.sort_by_key(|s| *s == CycleStatus::UpToDate);

    assert_eq!(statuses, vec![CycleStatus::Completed, CycleStatus::UpToDate]);
    assert_eq!(stored(sync.database(), "comics").await, (1..=LATEST).collect::<Vec<_>>());
    assert_eq!(
        sync.database().get_source("comics").await.unwrap().latest_index,
        LATEST
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_independent_synchronizers_converge() {
    let server = MockServer::start().await;
    mock_comics(&server, LATEST as u64..=2 * LATEST as u64).await;
    let dir = TempDir::new().unwrap();
    let registry = registry(&server);

    // Separate pools and separate lock tables over one file
    let a = synchronizer(file_db(&dir, &registry).await, Arc::clone(&registry));
    let b = synchronizer(file_db(&dir, &registry).await, Arc::clone(&registry));

    let (ra, rb) = tokio::join!(
        tokio::spawn({
            let a = a.clone();
            async move { a.update_cache("comics").await }
        }),
        tokio::spawn({
            let b = b.clone();
            async move { b.update_cache("comics").await }
        }),
    );
    let ra = ra.unwrap().unwrap();
    let rb = rb.unwrap().unwrap();

    // Storage refuses duplicates, so inserts add up to exactly one copy each
    assert_eq!(ra.inserted() + rb.inserted(), LATEST as u64);

    let db = a.database();
    let id = db.get_source("comics").await.unwrap().id;
    assert_eq!(db.count_entries(id).await.unwrap(), LATEST);
    assert_eq!(stored(db, "comics").await, (1..=LATEST).collect::<Vec<_>>());
    assert_eq!(db.get_source("comics").await.unwrap().latest_index, LATEST);
    assert_eq!(db.max_cache_index(id).await.unwrap(), LATEST);
}

// ============================================================================
// High-water mark
// ============================================================================

#[tokio::test]
async fn test_high_water_mark_never_decreases() {
    let server = MockServer::start().await;
    mock_comics(&server, 0..=0).await;
    let registry = registry(&server);
    let db = Database::open(":memory:").await.unwrap();
    db.seed_sources(&registry.seeds()).await.unwrap();
    let id = db.get_source("comics").await.unwrap().id;
    db.update_source(&SourceUpdate::latest_index(id, 10))
        .await
        .unwrap();

    let sync = synchronizer(db, registry);
    let report = sync.update_cache("comics").await.unwrap();

    assert_eq!(report.status, CycleStatus::UpToDate);
    assert_eq!(report.high_water_mark, HighWaterMark::Unchanged(10));
    assert_eq!(sync.database().get_source("comics").await.unwrap().latest_index, 10);
}

#[tokio::test]
async fn test_resumes_from_high_water_mark() {
    let server = MockServer::start().await;
    // Only 5 and 6 are past the stored mark
    mock_comics(&server, 2..=2).await;
    let registry = registry(&server);
    let db = Database::open(":memory:").await.unwrap();
    db.seed_sources(&registry.seeds()).await.unwrap();
    let id = db.get_source("comics").await.unwrap().id;
    db.update_source(&SourceUpdate::latest_index(id, 4))
        .await
        .unwrap();

    let sync = synchronizer(db, registry);
    let report = sync.update_cache("comics").await.unwrap();

    assert_eq!(report.starting_index, 4);
    assert_eq!(report.high_water_mark, HighWaterMark::Advanced { from: 4, to: 6 });
    assert_eq!(stored(sync.database(), "comics").await, vec![5, 6]);
}

#[tokio::test]
async fn test_sources_are_independent() {
    let server = MockServer::start().await;
    mock_comics(&server, LATEST as u64..=LATEST as u64).await;
    Mock::given(method("GET"))
        .and(path("/launches/latest"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let registry = registry(&server);
    let db = Database::open(":memory:").await.unwrap();
    db.seed_sources(&registry.seeds()).await.unwrap();
    let sync = synchronizer(db, registry);

    let results = sync.update_all().await;
    let latest: Vec<(String, i64)> = results
        .into_iter()
        .map(|(slug, r)| (slug, r.unwrap().latest_index()))
        .collect();

    assert_eq!(
        latest,
        vec![("comics".to_string(), LATEST), ("space".to_string(), 0)]
    );
    assert!(stored(sync.database(), "space").await.is_empty());
}
