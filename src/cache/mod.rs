//! Artifact and metadata caches.
//!
//! [`FileCache`] is the on-disk store shared with the installer;
//! [`MetadataCache`] decorates any [`ArtifactCache`] so provider listings are
//! filtered by the legacy-tags rules when read back.

mod artifact;
mod error;
mod metadata;

pub use artifact::{ArtifactCache, FileCache, sha256_hex};
pub use error::CacheError;
pub use metadata::{MetadataCache, filter_listing_bytes};
