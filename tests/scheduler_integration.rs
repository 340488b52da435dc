//! Integration tests for the download scheduler.
//!
//! These tests drive full batches against mock HTTP servers.

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use prefetcher_core::download::{
    Capabilities, DownloadScheduler, FetchRequest, HandlerError, HttpClient, ItemContext,
    RequestHandler, RequestQueue, ResponseCache,
};
use support::socket_guard::start_mock_server_or_skip;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, ResponseTemplate};

/// Fetches each request in memory and records handler overlap.
#[derive(Default)]
struct FetchingHandler {
    running: AtomicUsize,
    peak: AtomicUsize,
    bytes: AtomicUsize,
}

#[async_trait]
impl RequestHandler for FetchingHandler {
    async fn handle(&self, request: FetchRequest, ctx: ItemContext) -> Result<(), HandlerError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let outcome = ctx
            .fetch_one(
                request.host(),
                request.url(),
                request.destination(),
                true,
                request.extra_options(),
            )
            .await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        let output = outcome?;
        if let Some(bytes) = output.as_bytes() {
            self.bytes.fetch_add(bytes.len(), Ordering::SeqCst);
        }
        Ok(())
    }
}

fn scheduler(max_nesting: usize, capabilities: Capabilities) -> DownloadScheduler {
    DownloadScheduler::new(HttpClient::new(), ResponseCache::new(), max_nesting, capabilities)
        .expect("valid nesting")
}

#[tokio::test]
async fn test_ten_requests_with_cap_five_all_complete() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path_regex(r"^/p/\d+\.json$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{\"packages\": {}}")
                .set_delay(Duration::from_millis(100)),
        )
        .expect(10)
        .mount(&mock_server)
        .await;

    let queue: RequestQueue = (0..10)
        .map(|i| FetchRequest::new(format!("{}/p/{i}.json", mock_server.uri())))
        .collect();
    let handler = Arc::new(FetchingHandler::default());

    let stats = scheduler(5, Capabilities::detect())
        .run(&queue, handler.clone(), true, false)
        .await
        .expect("batch runs");

    assert_eq!(stats.dispatched, 10);
    assert_eq!(stats.succeeded, 10);
    assert_eq!(stats.failed, 0);
    assert!(stats.peak_nesting <= 5, "peak nesting {} exceeds cap", stats.peak_nesting);
    assert!(stats.max_nesting_reached);
    assert!(handler.peak.load(Ordering::SeqCst) <= 5);
    assert_eq!(handler.bytes.load(Ordering::SeqCst), 10 * "{\"packages\": {}}".len());
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_transport_failures_are_skipped() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/ok.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone.json"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&mock_server)
        .await;

    let queue: RequestQueue = ["ok.json", "gone.json", "ok.json"]
        .iter()
        .map(|name| FetchRequest::new(format!("{}/{name}", mock_server.uri())))
        .chain(std::iter::once(FetchRequest::new("ftp://mirror.example/x.zip")))
        .collect();

    let stats = scheduler(5, Capabilities::detect())
        .run(&queue, Arc::new(FetchingHandler::default()), true, false)
        .await
        .expect("batch runs");

    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.total(), 4);
}

/// Enqueues one follow-up archive download per listing it fetches.
struct ListingThenArchive {
    archive_base: String,
    target_dir: std::path::PathBuf,
    archives: AtomicUsize,
}

#[async_trait]
impl RequestHandler for ListingThenArchive {
    async fn handle(&self, request: FetchRequest, ctx: ItemContext) -> Result<(), HandlerError> {
        let output = ctx
            .fetch_one(
                request.host(),
                request.url(),
                request.destination(),
                false,
                &BTreeMap::new(),
            )
            .await?;
        if let Some(file) = output.path() {
            assert!(file.is_file());
            self.archives.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        let index = request.url().rsplit('/').next().unwrap_or_default().replace(".json", "");
        ctx.enqueue(
            FetchRequest::new(format!("{}/dist/{index}.zip", self.archive_base))
                .with_destination(self.target_dir.join(format!("{index}.zip"))),
        );
        Ok(())
    }
}

#[tokio::test]
async fn test_follow_up_downloads_join_the_running_batch() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path_regex(r"^/p/\d+\.json$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/dist/\d+\.zip$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0_u8; 4096]))
        .expect(4)
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let queue: RequestQueue = (0..4)
        .map(|i| FetchRequest::new(format!("{}/p/{i}.json", mock_server.uri())))
        .collect();
    let handler = Arc::new(ListingThenArchive {
        archive_base: mock_server.uri(),
        target_dir: temp_dir.path().join("archives"),
        archives: AtomicUsize::new(0),
    });

    let stats = scheduler(2, Capabilities::detect())
        .run(&queue, handler.clone(), true, false)
        .await
        .expect("batch runs");

    assert_eq!(stats.dispatched, 8);
    assert_eq!(stats.succeeded, 8);
    assert_eq!(handler.archives.load(Ordering::SeqCst), 4);
    for i in 0..4 {
        let archive = temp_dir.path().join("archives").join(format!("{i}.zip"));
        assert_eq!(std::fs::metadata(&archive).expect("archive exists").len(), 4096);
        assert!(!prefetcher_core::download::partial_path(&archive).exists());
    }
}

#[tokio::test]
async fn test_sequential_scheduler_gives_same_results() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path_regex(r"^/p/\d+\.json$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{}")
                .set_delay(Duration::from_millis(20)),
        )
        .mount(&mock_server)
        .await;

    let queue: RequestQueue = (0..6)
        .map(|i| FetchRequest::new(format!("{}/p/{i}.json", mock_server.uri())))
        .collect();
    let handler = Arc::new(FetchingHandler::default());
    let scheduler = scheduler(5, Capabilities::sequential());
    assert_eq!(scheduler.effective_nesting(), 1);

    let stats = scheduler
        .run(&queue, handler.clone(), true, false)
        .await
        .expect("batch runs");
    assert_eq!(stats.succeeded, 6);
    assert_eq!(stats.peak_nesting, 1);
    assert_eq!(handler.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_consecutive_batches_do_not_share_state() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&mock_server)
        .await;

    let scheduler = scheduler(3, Capabilities::detect());
    let first: RequestQueue = (0..3)
        .map(|i| FetchRequest::new(format!("{}/a/{i}", mock_server.uri())))
        .collect();
    let second: RequestQueue = (0..2)
        .map(|i| FetchRequest::new(format!("{}/b/{i}", mock_server.uri())))
        .collect();

    let a = scheduler
        .run(&first, Arc::new(FetchingHandler::default()), true, false)
        .await
        .expect("first batch");
    let b = scheduler
        .run(&second, Arc::new(FetchingHandler::default()), true, false)
        .await
        .expect("second batch");

    assert_eq!(a.succeeded, 3);
    assert_eq!(b.succeeded, 2);
    assert_eq!(b.dispatched, 2);
    assert!(!b.max_nesting_reached);
}
