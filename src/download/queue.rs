//! Fetch requests and the shared FIFO they wait in.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use url::Url;

/// One logical fetch: where to get it from and, optionally, where to put it.
///
/// Requests are built up front and never change once enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    host: String,
    url: String,
    destination: Option<PathBuf>,
    extra_options: BTreeMap<String, String>,
    cache_response: bool,
}

impl FetchRequest {
    /// Creates a request for `url`, taking the host from the URL itself.
    ///
    /// An unparseable URL gets an empty host; the fetch will fail later with
    /// an invalid-URL error, which is logged and skipped like any other.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let host = host_of(&url).unwrap_or_default();
        Self::for_host(host, url)
    }

    /// Creates a request with an explicit origin host.
    #[must_use]
    pub fn for_host(host: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            url: url.into(),
            destination: None,
            extra_options: BTreeMap::new(),
            cache_response: false,
        }
    }

    /// Streams the response into `path` instead of returning it in memory.
    #[must_use]
    pub fn with_destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = Some(path.into());
        self
    }

    /// Adds a request header sent with the fetch.
    #[must_use]
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_options.insert(name.into(), value.into());
        self
    }

    /// Host the request originates from (used for auth and logging).
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// URL to fetch.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Destination file, when the body should land on disk.
    #[must_use]
    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    /// Extra request headers.
    #[must_use]
    pub fn extra_options(&self) -> &BTreeMap<String, String> {
        &self.extra_options
    }

    /// Whether the next response fetched for this request goes into the
    /// in-memory response cache.
    #[must_use]
    pub fn cache_response(&self) -> bool {
        self.cache_response
    }
}

/// Extracts the host component of `url`.
#[must_use]
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
}

/// FIFO of pending requests shared between the scheduler and its handlers.
///
/// Clones share the same underlying queue, so a handler holding a clone can
/// append follow-up requests while the batch is running.
#[derive(Debug, Clone, Default)]
pub struct RequestQueue {
    inner: Arc<Mutex<VecDeque<FetchRequest>>>,
}

impl RequestQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request.
    pub fn push(&self, request: FetchRequest) {
        self.lock().push_back(request);
    }

    /// Appends a request whose next response should be cached in memory.
    pub fn push_cached(&self, mut request: FetchRequest) {
        request.cache_response = true;
        self.push(request);
    }

    /// Removes and returns the oldest request.
    #[must_use]
    pub fn pop(&self) -> Option<FetchRequest> {
        self.lock().pop_front()
    }

    /// Number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<FetchRequest>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FromIterator<FetchRequest> for RequestQueue {
    fn from_iter<I: IntoIterator<Item = FetchRequest>>(iter: I) -> Self {
        Self {
            inner: Arc::new(Mutex::new(iter.into_iter().collect())),
        }
    }
}
