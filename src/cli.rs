//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Prefetch package metadata and archives ahead of a package-manager run.
///
/// The prefetcher warms repository provider listings and downloads the
/// archives an install or update will need, so the host finds them in its
/// caches. It can also strip legacy tags from a provider listing.
#[derive(Parser, Debug)]
#[command(name = "prefetcher")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Warm listings for a host command and download pending archives
    Prefetch(PrefetchArgs),
    /// Print a provider listing with legacy tags removed
    Filter(FilterArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PrefetchArgs {
    /// Host command being run (install, update, require, outdated, create-project)
    pub host_command: String,

    /// Project manifest (composer.json) with repositories and constraints
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// JSON list of install/update/uninstall operations to prefetch archives for
    #[arg(long, value_name = "PATH")]
    pub operations: Option<PathBuf>,

    /// Artifact cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// The host is only simulating the run; skip archive downloads
    #[arg(long)]
    pub dry_run: bool,

    /// Do not draw a progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Maximum handlers in flight (1-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub max_nesting: Option<u8>,

    /// Run one request at a time
    #[arg(long)]
    pub sequential: bool,

    /// Connect timeout in seconds (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout: Option<u64>,

    /// Read timeout in seconds (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub read_timeout: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    /// Provider listing to filter ("-" reads stdin)
    pub listing: PathBuf,

    /// Project manifest providing the constraints
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Extra constraint as NAME=CONSTRAINT (repeatable)
    #[arg(long = "require", value_name = "NAME=CONSTRAINT")]
    pub requires: Vec<String>,
}
