//! Bounded worker pool that drains a [`RequestQueue`].
//!
//! Every popped [`FetchRequest`] is handed to a [`RequestHandler`] running in
//! its own Tokio task. A per-run semaphore sized to the nesting cap bounds how
//! many handlers run at once; handlers may append to the queue while the
//! batch is running and those requests are picked up by the same run.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use prefetcher_core::download::{
//!     Capabilities, DownloadScheduler, FetchRequest, HandlerError, HttpClient, ItemContext,
//!     RequestHandler, RequestQueue, ResponseCache,
//! };
//!
//! struct Warm;
//!
//! #[async_trait]
//! impl RequestHandler for Warm {
//!     async fn handle(&self, request: FetchRequest, ctx: ItemContext) -> Result<(), HandlerError> {
//!         ctx.fetch_one(request.host(), request.url(), None, true, request.extra_options())
//!             .await?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler =
//!     DownloadScheduler::new(HttpClient::new(), ResponseCache::new(), 5, Capabilities::detect())?;
//! let queue = RequestQueue::new();
//! queue.push_cached(FetchRequest::new("https://repo.packagist.org/packages.json"));
//! let stats = scheduler.run(&queue, Arc::new(Warm), false, true).await?;
//! println!("{} fetched, {} skipped", stats.succeeded, stats.failed);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, instrument, warn};

use super::client::HttpClient;
use super::constants::{MAX_NESTING, MIN_NESTING};
use super::error::{DownloadError, SchedulerError};
use super::progress::BatchProgress;
use super::queue::{FetchRequest, RequestQueue};
use super::response_cache::ResponseCache;
use super::transport::{FetchOptions, FetchOutput, RemoteFetch, TransferEvent};

/// Error type returned by request handlers; any error is logged and skipped.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Per-request callback invoked by [`DownloadScheduler::run`].
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Processes one request. `ctx` fetches with batch-wide progress
    /// accounting and can append follow-up requests.
    ///
    /// # Errors
    ///
    /// Any error marks the request as skipped; it never aborts the batch.
    async fn handle(&self, request: FetchRequest, ctx: ItemContext) -> Result<(), HandlerError>;
}

/// What the transport layer can do, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Transfers report per-chunk progress.
    pub progress_introspection: bool,
    /// Several transfers may be in flight at once.
    pub native_downloader: bool,
}

impl Capabilities {
    /// Capabilities of the built-in streaming client.
    #[must_use]
    pub fn detect() -> Self {
        Self {
            progress_introspection: true,
            native_downloader: true,
        }
    }

    /// Capabilities that force one request at a time.
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            progress_introspection: false,
            native_downloader: false,
        }
    }

    /// Whether overlapping requests is worth attempting.
    #[must_use]
    pub fn supports_overlap(self) -> bool {
        self.progress_introspection && self.native_downloader
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::detect()
    }
}

/// Outcome of one [`DownloadScheduler::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Requests handed to the handler, including ones appended mid-batch.
    pub dispatched: usize,
    /// Handlers that returned `Ok`.
    pub succeeded: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
    /// Most handlers that ran at the same time.
    pub peak_nesting: usize,
    /// Whether any request had to wait for a free slot.
    pub max_nesting_reached: bool,
}

impl BatchStats {
    /// Returns the number of finished requests (succeeded + failed).
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Runs batches of fetch requests with a bounded number of concurrent handlers.
#[derive(Debug, Clone)]
pub struct DownloadScheduler {
    client: HttpClient,
    cache: ResponseCache,
    max_nesting: usize,
    capabilities: Capabilities,
}

impl DownloadScheduler {
    /// Creates a scheduler.
    ///
    /// When `capabilities` does not support overlap, every batch runs one
    /// request at a time regardless of `max_nesting`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidNesting`] if `max_nesting` is outside
    /// the valid range (1-100).
    #[instrument(level = "debug", skip(client, cache))]
    pub fn new(
        client: HttpClient,
        cache: ResponseCache,
        max_nesting: usize,
        capabilities: Capabilities,
    ) -> Result<Self, SchedulerError> {
        if !(MIN_NESTING..=MAX_NESTING).contains(&max_nesting) {
            return Err(SchedulerError::InvalidNesting { value: max_nesting });
        }
        if !capabilities.supports_overlap() {
            debug!(
                progress_introspection = capabilities.progress_introspection,
                native_downloader = capabilities.native_downloader,
                "transport cannot overlap requests, running sequentially"
            );
        }
        Ok(Self {
            client,
            cache,
            max_nesting,
            capabilities,
        })
    }

    /// Configured nesting cap.
    #[must_use]
    pub fn max_nesting(&self) -> usize {
        self.max_nesting
    }

    /// Cap actually applied to a batch (1 when running sequentially).
    #[must_use]
    pub fn effective_nesting(&self) -> usize {
        if self.capabilities.supports_overlap() {
            self.max_nesting
        } else {
            MIN_NESTING
        }
    }

    /// Capabilities this scheduler was built with.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// The in-memory response cache shared with handlers.
    #[must_use]
    pub fn response_cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Drains `queue`, dispatching every request to `handler` exactly once.
    ///
    /// Returns once the queue is empty and no handler is running. Handler
    /// errors and panics are logged and counted, never propagated.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::SemaphoreClosed`] if the slot semaphore is
    /// closed, which cannot happen through this API.
    #[instrument(skip(self, queue, handler), fields(pending = queue.len()))]
    pub async fn run(
        &self,
        queue: &RequestQueue,
        handler: Arc<dyn RequestHandler>,
        quiet: bool,
        show_progress: bool,
    ) -> Result<BatchStats, SchedulerError> {
        let pending = queue.len();
        if pending > 0 && !quiet {
            info!("Prefetching {pending} packages");
        }

        let cap = self.effective_nesting();
        let progress = Arc::new(BatchProgress::new(pending, show_progress && !quiet));
        let semaphore = Arc::new(Semaphore::new(cap));
        let mut tasks: JoinSet<(String, Result<(), HandlerError>)> = JoinSet::new();
        let mut stats = BatchStats::default();

        loop {
            while let Some(joined) = tasks.try_join_next() {
                record_outcome(joined, &progress, &mut stats);
            }

            let Some(request) = queue.pop() else {
                // Running handlers may still append requests.
                match tasks.join_next().await {
                    Some(joined) => {
                        record_outcome(joined, &progress, &mut stats);
                        continue;
                    }
                    None => break,
                }
            };

            stats.dispatched += 1;
            progress.grow_total(stats.dispatched + queue.len());

            let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => {
                    progress.mark_max_nesting_reached();
                    debug!(
                        max_nesting = cap,
                        url = %request.url(),
                        "nesting cap reached, waiting for a free slot"
                    );
                    Arc::clone(&semaphore)
                        .acquire_owned()
                        .await
                        .map_err(|_| SchedulerError::SemaphoreClosed)?
                }
                Err(TryAcquireError::Closed) => return Err(SchedulerError::SemaphoreClosed),
            };

            let ctx = ItemContext {
                client: self.client.clone(),
                cache: self.cache.clone(),
                queue: queue.clone(),
                progress: Arc::clone(&progress),
                cache_next: Arc::new(AtomicBool::new(request.cache_response())),
                show_progress,
            };
            let handler = Arc::clone(&handler);
            let task_progress = Arc::clone(&progress);

            tasks.spawn(async move {
                // Permit and nesting level are released when this block exits (RAII)
                let _permit = permit;
                let _nesting = task_progress.enter();
                let url = request.url().to_string();
                let outcome = handler.handle(request, ctx).await;
                (url, outcome)
            });
        }

        let state = progress.snapshot();
        progress.finish();
        stats.peak_nesting = state.peak_nesting();
        stats.max_nesting_reached = state.max_nesting_reached();

        if stats.dispatched > 0 && !quiet {
            info!("(100%)");
        }
        debug!(
            dispatched = stats.dispatched,
            succeeded = stats.succeeded,
            failed = stats.failed,
            peak_nesting = stats.peak_nesting,
            max_nesting_reached = stats.max_nesting_reached,
            "prefetch batch complete"
        );
        Ok(stats)
    }

    /// Fetches one URL outside of any batch.
    ///
    /// In-memory fetches are served from the response cache when possible.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] for transport, HTTP status and file system
    /// failures.
    #[instrument(skip(self, options), fields(url = %url))]
    pub async fn fetch_one(
        &self,
        host: &str,
        url: &str,
        destination: Option<&Path>,
        show_progress: bool,
        options: &BTreeMap<String, String>,
    ) -> Result<FetchOutput, DownloadError> {
        debug!(host, "standalone fetch");
        let progress = show_progress.then(|| BatchProgress::new(1, false));
        let mut on_event = |event: TransferEvent| {
            if let Some(progress) = &progress {
                progress.observe(event);
            }
        };
        perform_fetch(
            &self.client,
            &self.cache,
            url,
            destination,
            options,
            false,
            &mut on_event,
        )
        .await
    }
}

#[async_trait]
impl RemoteFetch for DownloadScheduler {
    async fn fetch(
        &self,
        host: &str,
        url: &str,
        options: FetchOptions,
    ) -> Result<FetchOutput, DownloadError> {
        self.fetch_one(
            host,
            url,
            options.destination.as_deref(),
            options.show_progress,
            &options.headers,
        )
        .await
    }
}

/// Handle given to a [`RequestHandler`] for the request it is processing.
#[derive(Debug, Clone)]
pub struct ItemContext {
    client: HttpClient,
    cache: ResponseCache,
    queue: RequestQueue,
    progress: Arc<BatchProgress>,
    cache_next: Arc<AtomicBool>,
    show_progress: bool,
}

impl ItemContext {
    /// Whether the batch was started with a visible progress display.
    #[must_use]
    pub fn show_progress(&self) -> bool {
        self.show_progress
    }

    /// Appends a follow-up request to the running batch.
    pub fn enqueue(&self, request: FetchRequest) {
        self.progress.grow_total(self.queue.len() + 1);
        self.queue.push(request);
    }

    /// Fetches one URL, feeding the batch progress when `show_progress` is set.
    ///
    /// If the request was enqueued with the cache flag, the first in-memory
    /// response fetched through this context is stored in the response cache.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] for transport, HTTP status and file system
    /// failures.
    #[instrument(skip(self, options), fields(url = %url))]
    pub async fn fetch_one(
        &self,
        host: &str,
        url: &str,
        destination: Option<&Path>,
        show_progress: bool,
        options: &BTreeMap<String, String>,
    ) -> Result<FetchOutput, DownloadError> {
        let store = destination.is_none() && self.cache_next.swap(false, Ordering::SeqCst);
        debug!(host, store, "batch fetch");
        let progress = Arc::clone(&self.progress);
        let mut on_event = move |event: TransferEvent| {
            if show_progress {
                progress.observe(event);
            }
        };
        perform_fetch(
            &self.client,
            &self.cache,
            url,
            destination,
            options,
            store,
            &mut on_event,
        )
        .await
    }
}

#[async_trait]
impl RemoteFetch for ItemContext {
    async fn fetch(
        &self,
        host: &str,
        url: &str,
        options: FetchOptions,
    ) -> Result<FetchOutput, DownloadError> {
        self.fetch_one(
            host,
            url,
            options.destination.as_deref(),
            options.show_progress,
            &options.headers,
        )
        .await
    }
}

/// Serves in-memory fetches from the cache, otherwise goes to the network and
/// optionally stores the body.
async fn perform_fetch(
    client: &HttpClient,
    cache: &ResponseCache,
    url: &str,
    destination: Option<&Path>,
    headers: &BTreeMap<String, String>,
    store: bool,
    on_event: &mut (dyn FnMut(TransferEvent) + Send),
) -> Result<FetchOutput, DownloadError> {
    if destination.is_none()
        && let Some(body) = cache.get(url)
    {
        debug!(url, bytes = body.len(), "serving response from memory cache");
        return Ok(FetchOutput::Bytes(body));
    }

    let output = client.fetch(url, headers, destination, on_event).await?;
    if store && let FetchOutput::Bytes(body) = &output {
        cache.insert(url, body);
    }
    Ok(output)
}

fn record_outcome(
    joined: Result<(String, Result<(), HandlerError>), JoinError>,
    progress: &BatchProgress,
    stats: &mut BatchStats,
) {
    match joined {
        Ok((_, Ok(()))) => stats.succeeded += 1,
        Ok((url, Err(error))) => {
            debug!(url = %url, error = %error, "skipping download: {error}");
            stats.failed += 1;
        }
        Err(error) => {
            // Ignore JoinError - a panicking handler only loses its own request
            warn!(error = %error, "request handler panicked");
            stats.failed += 1;
        }
    }
    progress.item_finished();
}
