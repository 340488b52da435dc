//! Repository metadata sources.
//!
//! [`ComposerRepository`] loads root metadata, provider indexes and
//! per-package listings; [`FilteredRepository`] wraps any
//! [`MetadataSource`] so listings fetched live are filtered before they reach
//! the resolver.

mod composer;
mod descriptor;
mod error;
mod filtered;

pub use composer::{ComposerRepository, MetadataSource, ProviderLister, ProviderLocation};
pub use descriptor::{PACKAGIST_URL, RepositoryDescriptor};
pub use error::RepositoryError;
pub use filtered::FilteredRepository;
