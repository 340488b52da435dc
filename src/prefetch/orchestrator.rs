//! Decides what to prefetch and hands it to the scheduler.
//!
//! Prefetching is a pure optimization: every skipped or failed request is
//! simply fetched again later by the host, so nothing here returns an error
//! for a single package or repository.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::package::{InstallationSource, Operation, Package};
use super::url::transfer_url;
use crate::cache::ArtifactCache;
use crate::download::{
    BatchStats, DownloadScheduler, FetchRequest, HandlerError, ItemContext, RequestHandler,
    RequestQueue, SchedulerError,
};
use crate::legacy::LegacyTagsManager;
use crate::repository::{ComposerRepository, FilteredRepository, ProviderLister, RepositoryDescriptor};

/// Host commands that resolve dependencies and benefit from warm listings.
pub const PREFETCH_COMMANDS: [&str; 5] = ["install", "update", "require", "outdated", "create-project"];

/// Errors that abort a prefetch batch as a whole.
#[derive(Debug, Error)]
pub enum PrefetchError {
    /// The scheduler failed.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// The operations document could not be decoded.
    #[error("invalid operations list: {source}")]
    InvalidOperations {
        /// The decode error.
        #[source]
        source: serde_json::Error,
    },
}

/// Decodes a JSON array of operations.
///
/// # Errors
///
/// Returns [`PrefetchError::InvalidOperations`] when the document does not
/// describe a list of operations.
pub fn parse_operations(json: &str) -> Result<Vec<Operation>, PrefetchError> {
    serde_json::from_str(json).map_err(|source| PrefetchError::InvalidOperations { source })
}

/// Run-wide switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchSettings {
    /// Suppress the user-facing log lines.
    pub quiet: bool,
    /// Draw a progress bar for archive downloads.
    pub show_progress: bool,
    /// The host only simulates the run.
    pub dry_run: bool,
    /// A native accelerator already prefetches listings.
    pub accelerator_active: bool,
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self {
            quiet: false,
            show_progress: true,
            dry_run: false,
            accelerator_active: false,
        }
    }
}

/// What one prefetch call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Requests handed to the scheduler.
    pub enqueued: usize,
    /// Candidates left out (not eligible, already cached, duplicates).
    pub skipped: usize,
    /// Scheduler outcome; all zero when nothing ran.
    pub stats: BatchStats,
}

impl PrefetchReport {
    /// Whether the call did not touch the network.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.enqueued == 0
    }
}

/// Returns whether `command` resolves dependencies.
#[must_use]
pub fn is_prefetch_command(command: &str) -> bool {
    PREFETCH_COMMANDS.contains(&command)
}

/// Orchestrates listing and archive prefetches.
pub struct Prefetcher {
    scheduler: Arc<DownloadScheduler>,
    cache: Arc<dyn ArtifactCache>,
    tags: Arc<LegacyTagsManager>,
    settings: PrefetchSettings,
}

impl std::fmt::Debug for Prefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefetcher")
            .field("scheduler", &self.scheduler)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Prefetcher {
    /// Creates a prefetcher writing into `cache`.
    pub fn new(
        scheduler: Arc<DownloadScheduler>,
        cache: Arc<dyn ArtifactCache>,
        tags: Arc<LegacyTagsManager>,
        settings: PrefetchSettings,
    ) -> Self {
        Self {
            scheduler,
            cache,
            tags,
            settings,
        }
    }

    /// The scheduler batches run on.
    #[must_use]
    pub fn scheduler(&self) -> &DownloadScheduler {
        &self.scheduler
    }

    /// Run-wide switches.
    #[must_use]
    pub fn settings(&self) -> PrefetchSettings {
        self.settings
    }

    /// Warms the provider listings of every eligible repository.
    ///
    /// Each root `packages.json` is fetched with the cache flag, so the
    /// host's own read during resolution is served from memory.
    ///
    /// # Errors
    ///
    /// Returns [`PrefetchError::Scheduler`] only if the batch itself fails.
    #[instrument(skip(self, repositories), fields(repositories = repositories.len()))]
    pub async fn prefetch_repository_listings(
        &self,
        command: &str,
        repositories: &[RepositoryDescriptor],
    ) -> Result<PrefetchReport, PrefetchError> {
        if !is_prefetch_command(command) {
            debug!(command, "command does not resolve dependencies, nothing to prefetch");
            return Ok(PrefetchReport::default());
        }
        if self.settings.accelerator_active {
            debug!("native accelerator active, leaving listings to it");
            return Ok(PrefetchReport::default());
        }

        let queue = RequestQueue::new();
        let mut listers: BTreeMap<String, Arc<dyn ProviderLister>> = BTreeMap::new();
        let mut skipped = 0;
        for descriptor in repositories {
            if !descriptor.is_eligible() {
                debug!(kind = %descriptor.kind, url = %descriptor.url, "repository not eligible for prefetch");
                skipped += 1;
                continue;
            }
            let repository = match ComposerRepository::new(descriptor.clone(), Arc::clone(&self.cache)) {
                Ok(repository) => repository,
                Err(error) => {
                    warn!(url = %descriptor.url, error = %error, "skipping repository");
                    skipped += 1;
                    continue;
                }
            };
            let root_url = repository.root_url().to_string();
            if listers.contains_key(&root_url) {
                skipped += 1;
                continue;
            }
            queue.push_cached(FetchRequest::new(root_url.clone()));
            listers.insert(
                root_url,
                Arc::new(FilteredRepository::new(repository, Arc::clone(&self.tags))),
            );
        }

        if queue.is_empty() {
            return Ok(PrefetchReport {
                skipped,
                ..PrefetchReport::default()
            });
        }

        let enqueued = queue.len();
        let handler = Arc::new(ListingHandler { listers });
        // Listing fetches are small; a bar would only flicker.
        let stats = self
            .scheduler
            .run(&queue, handler, self.settings.quiet, false)
            .await?;
        Ok(PrefetchReport {
            enqueued,
            skipped,
            stats,
        })
    }

    /// Downloads the archives `operations` will install into the artifact cache.
    ///
    /// Runs only when at least two archives are missing and the host is not
    /// in dry-run mode.
    ///
    /// # Errors
    ///
    /// Returns [`PrefetchError::Scheduler`] only if the batch itself fails.
    #[instrument(skip(self, operations), fields(operations = operations.len()))]
    pub async fn prefetch_operation_artifacts(
        &self,
        operations: &[Operation],
    ) -> Result<PrefetchReport, PrefetchError> {
        let queue = RequestQueue::new();
        let mut destinations = BTreeSet::new();
        let mut skipped = 0;

        for package in operations.iter().filter_map(Operation::target) {
            match self.plan_artifact(package) {
                Some(planned) if destinations.insert(planned.destination.clone()) => {
                    queue.push(FetchRequest::new(planned.url).with_destination(planned.destination));
                }
                _ => skipped += 1,
            }
        }

        let pending = queue.len();
        if pending < 2 || self.settings.dry_run {
            debug!(pending, dry_run = self.settings.dry_run, "archive prefetch not worthwhile");
            return Ok(PrefetchReport {
                enqueued: 0,
                skipped: skipped + pending,
                stats: BatchStats::default(),
            });
        }

        if !self.settings.quiet {
            info!("Downloading {pending} package archives");
        }
        let stats = self
            .scheduler
            .run(
                &queue,
                Arc::new(ArtifactHandler),
                self.settings.quiet,
                self.settings.show_progress,
            )
            .await?;
        Ok(PrefetchReport {
            enqueued: pending,
            skipped,
            stats,
        })
    }

    /// Works out where `package`'s archive comes from and where it goes.
    fn plan_artifact(&self, package: &Package) -> Option<PlannedArtifact> {
        if package.is_metapackage() {
            debug!(package = %package.name, "metapackage, nothing to download");
            return None;
        }
        if package.installation_source == Some(InstallationSource::Source) {
            debug!(package = %package.name, "installed from source, skipping archive");
            return None;
        }
        let Some(url) = package.dist_urls().into_iter().next() else {
            debug!(package = %package.name, "no dist URL");
            return None;
        };

        let key = self.cache.cache_key(&package.name, &url, package.dist_type());
        let destination = match self.cache.path_for(&key) {
            Ok(path) => path,
            Err(error) => {
                debug!(package = %package.name, error = %error, "no cache destination");
                return None;
            }
        };
        if destination.exists() {
            debug!(package = %package.name, path = %destination.display(), "archive already cached");
            return None;
        }

        Some(PlannedArtifact {
            url: transfer_url(&url),
            destination,
        })
    }
}

struct PlannedArtifact {
    url: String,
    destination: PathBuf,
}

/// Loads the provider names of the repository a request was queued for.
struct ListingHandler {
    listers: BTreeMap<String, Arc<dyn ProviderLister>>,
}

#[async_trait]
impl RequestHandler for ListingHandler {
    async fn handle(&self, request: FetchRequest, ctx: ItemContext) -> Result<(), HandlerError> {
        let Some(lister) = self.listers.get(request.url()) else {
            return Err(format!("no repository registered for {}", request.url()).into());
        };
        let names = lister.provider_names(&ctx).await?;
        debug!(url = %request.url(), providers = names.len(), "provider listing warmed");
        Ok(())
    }
}

/// Streams one archive to its cache destination.
struct ArtifactHandler;

#[async_trait]
impl RequestHandler for ArtifactHandler {
    async fn handle(&self, request: FetchRequest, ctx: ItemContext) -> Result<(), HandlerError> {
        let output = ctx
            .fetch_one(
                request.host(),
                request.url(),
                request.destination(),
                ctx.show_progress(),
                request.extra_options(),
            )
            .await?;
        if let Some(path) = output.path() {
            debug!(url = %request.url(), path = %path.display(), "archive cached");
        }
        Ok(())
    }
}
