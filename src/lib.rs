//! Prefetcher Core Library
//!
//! This library speeds up package-manager runs by fetching repository
//! metadata and distribution archives ahead of the host, and keeps obsolete
//! monorepo versions out of the provider listings the resolver sees.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Bounded parallel fetch scheduler, HTTP client, response cache
//! - [`prefetch`] - Decides which listings and archives to fetch
//! - [`legacy`] - Version constraints and the legacy-tags filter
//! - [`cache`] - On-disk artifact cache and the filtering metadata cache
//! - [`repository`] - Composer repository metadata and the filtering adapter

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod download;
pub mod legacy;
pub mod prefetch;
pub mod repository;
pub(crate) mod user_agent;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use cache::{ArtifactCache, CacheError, FileCache, MetadataCache};
pub use download::{
    BatchStats, Capabilities, DEFAULT_MAX_NESTING, DownloadError, DownloadScheduler, FetchRequest,
    HttpClient, RequestHandler, RequestQueue, ResponseCache, SchedulerError,
};
pub use legacy::{ConstraintError, LegacyTagsManager, VersionConstraint};
pub use prefetch::{
    Operation, Package, PrefetchError, PrefetchReport, PrefetchSettings, Prefetcher,
    parse_operations,
};
pub use repository::{ComposerRepository, FilteredRepository, RepositoryDescriptor, RepositoryError};
