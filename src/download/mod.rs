//! Download scheduling and HTTP transport.
//!
//! This module provides the streaming [`HttpClient`], the bounded worker
//! pool ([`DownloadScheduler`]) that drains a shared [`RequestQueue`], and the
//! in-memory [`ResponseCache`] that lets repeated reads within one run skip
//! the network.
//!
//! # Features
//!
//! - Streaming downloads into memory or into `<dest>.part` then renamed
//! - Configurable timeouts (30s connect, 5min read by default)
//! - At most `max_nesting` handlers in flight (default 5)
//! - Aggregate progress, monotonic and throttled to 1% or 1 second
//! - Structured error types with full context

mod client;
pub mod constants;
mod error;
mod progress;
mod queue;
mod response_cache;
mod scheduler;
mod transport;

pub use client::{HttpClient, partial_path};
pub use constants::DEFAULT_MAX_NESTING;
pub use error::{DownloadError, SchedulerError};
pub use progress::SchedulerState;
pub use queue::{FetchRequest, RequestQueue, host_of};
pub use response_cache::ResponseCache;
pub use scheduler::{
    BatchStats, Capabilities, DownloadScheduler, HandlerError, ItemContext, RequestHandler,
};
pub use transport::{FetchOptions, FetchOutput, RemoteFetch, TransferEvent};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
