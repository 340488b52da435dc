//! CLI entry point for the prefetcher tool.

use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use prefetcher_core::{
    ArtifactCache, Capabilities, DownloadScheduler, FileCache, HttpClient, LegacyTagsManager,
    MetadataCache, PrefetchSettings, Prefetcher, ResponseCache, parse_operations,
};
use tracing::{debug, info};

mod app_config;
mod cli;

use app_config::{
    load_manifest, parse_require_pair, register_constraints, resolve_run_config,
    symfony_require_from_env,
};
use cli::{Cli, Command, FilterArgs, PrefetchArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // stdout is reserved for command output (filtered listings)
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");

    match &cli.command {
        Command::Prefetch(args) => run_prefetch(args, cli.quiet).await,
        Command::Filter(args) => run_filter(args),
    }
}

async fn run_prefetch(args: &PrefetchArgs, quiet: bool) -> Result<()> {
    let manifest = load_manifest(args.manifest.as_deref())?;
    let config = resolve_run_config(args, &manifest);
    debug!(?config, "resolved run configuration");

    let tags = Arc::new(LegacyTagsManager::new());
    register_constraints(&tags, &manifest.legacy_constraints(symfony_require_from_env()))?;

    let cache: Arc<dyn ArtifactCache> = Arc::new(MetadataCache::new(
        FileCache::new(&config.cache_dir),
        Arc::clone(&tags),
    ));

    let client = HttpClient::try_new_with_timeouts(config.connect_timeout_secs, config.read_timeout_secs)
        .context("Failed to build HTTP client")?;
    let capabilities = if args.sequential {
        Capabilities::sequential()
    } else {
        Capabilities::detect()
    };
    let scheduler = DownloadScheduler::new(client, ResponseCache::new(), config.max_nesting, capabilities)?;

    let settings = PrefetchSettings {
        quiet,
        show_progress: !args.no_progress && io::stderr().is_terminal(),
        dry_run: args.dry_run,
        accelerator_active: config.accelerator_active,
    };
    let prefetcher = Prefetcher::new(Arc::new(scheduler), cache, tags, settings);

    let listings = prefetcher
        .prefetch_repository_listings(&args.host_command, &manifest.repositories())
        .await?;
    info!(
        repositories = listings.enqueued,
        skipped = listings.skipped,
        failed = listings.stats.failed,
        "Listing prefetch complete"
    );

    if let Some(path) = &args.operations {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read operations: {}", path.display()))?;
        let operations =
            parse_operations(&raw).with_context(|| format!("In {}", path.display()))?;
        let archives = prefetcher.prefetch_operation_artifacts(&operations).await?;
        info!(
            archives = archives.enqueued,
            downloaded = archives.stats.succeeded,
            failed = archives.stats.failed,
            skipped = archives.skipped,
            cache_dir = %config.cache_dir.display(),
            "Archive prefetch complete"
        );
    }

    Ok(())
}

fn run_filter(args: &FilterArgs) -> Result<()> {
    let manifest = load_manifest(args.manifest.as_deref())?;
    let mut constraints = manifest.legacy_constraints(symfony_require_from_env());
    for pair in &args.requires {
        constraints.push(parse_require_pair(pair)?);
    }

    let tags = LegacyTagsManager::new();
    register_constraints(&tags, &constraints)?;

    let raw = read_listing(&args.listing)?;
    let listing: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse listing JSON: {}", args.listing.display()))?;

    let filtered = tags.filter(&listing);
    println!("{}", serde_json::to_string_pretty(&filtered)?);
    Ok(())
}

fn read_listing(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read listing from stdin")?;
        return Ok(buffer);
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read listing: {}", path.display()))
}
