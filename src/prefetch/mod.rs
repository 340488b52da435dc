//! Prefetch orchestration.
//!
//! [`Prefetcher`] decides which repository listings and which package
//! archives are worth fetching ahead of the host, and where archives go in
//! the artifact cache.

mod orchestrator;
mod package;
mod url;

pub use orchestrator::{
    PREFETCH_COMMANDS, PrefetchError, PrefetchReport, PrefetchSettings, Prefetcher,
    is_prefetch_command, parse_operations,
};
pub use package::{Dist, InstallationSource, Mirror, Operation, Package};
pub use self::url::transfer_url;
