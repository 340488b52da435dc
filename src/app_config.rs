//! Project manifest loading and run configuration.
//!
//! Values resolve in the order CLI flag, manifest `config`, built-in default.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use prefetcher_core::LegacyTagsManager;
use prefetcher_core::download::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_MAX_NESTING, MAX_NESTING, MAX_TIMEOUT_SECS, MIN_NESTING,
    READ_TIMEOUT_SECS,
};
use prefetcher_core::repository::RepositoryDescriptor;
use serde::Deserialize;

use crate::cli::PrefetchArgs;

/// Environment override for the `symfony/symfony` constraint.
pub const SYMFONY_REQUIRE_ENV: &str = "SYMFONY_REQUIRE";

/// The parts of a project manifest the prefetcher reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    /// Declared repositories; the public repository when absent.
    #[serde(default)]
    pub repositories: Option<Vec<RepositoryDescriptor>>,
    /// Plugin settings.
    #[serde(default)]
    pub extra: ManifestExtra,
    /// Prefetcher tuning.
    #[serde(default)]
    pub config: ManifestConfig,
}

/// `extra` section of the manifest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestExtra {
    /// `extra.symfony`.
    #[serde(default)]
    pub symfony: SymfonyExtra,
    /// Additional packages to restrict, `{name: constraint}`.
    #[serde(rename = "legacy-tags", default)]
    pub legacy_tags: BTreeMap<String, String>,
}

/// `extra.symfony` section of the manifest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SymfonyExtra {
    /// Constraint for `symfony/symfony` and the packages it replaces.
    #[serde(default)]
    pub require: Option<String>,
}

/// `config` section of the manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestConfig {
    /// Artifact cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Connect timeout in seconds.
    pub connect_timeout: Option<u64>,
    /// Read timeout in seconds.
    pub read_timeout: Option<u64>,
    /// Handlers allowed in flight.
    pub max_nesting: Option<usize>,
    /// A native accelerator already prefetches listings.
    pub accelerator: Option<bool>,
}

impl Manifest {
    /// Validates config values against runtime constraints.
    pub fn validate(&self) -> Result<()> {
        validate_timeout_secs("connect-timeout", self.config.connect_timeout)?;
        validate_timeout_secs("read-timeout", self.config.read_timeout)?;
        if let Some(nesting) = self.config.max_nesting
            && !(MIN_NESTING..=MAX_NESTING).contains(&nesting)
        {
            bail!(
                "Invalid config value for `max-nesting`: {nesting}. Expected range: {MIN_NESTING}..={MAX_NESTING}"
            );
        }
        Ok(())
    }

    /// Repositories to prefetch from.
    #[must_use]
    pub fn repositories(&self) -> Vec<RepositoryDescriptor> {
        self.repositories
            .clone()
            .unwrap_or_else(|| vec![RepositoryDescriptor::packagist()])
    }

    /// Root constraints to register, `symfony/symfony` taken from
    /// `env_require` when set.
    #[must_use]
    pub fn legacy_constraints(&self, env_require: Option<String>) -> Vec<(String, String)> {
        let mut constraints: BTreeMap<String, String> = self.extra.legacy_tags.clone();
        if let Some(require) = env_require.or_else(|| self.extra.symfony.require.clone()) {
            constraints.insert("symfony/symfony".to_string(), require);
        }
        constraints.into_iter().collect()
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=MAX_TIMEOUT_SECS).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..={MAX_TIMEOUT_SECS}");
    }
    Ok(())
}

/// Loads and validates the manifest at `path`; defaults when no path is given.
pub fn load_manifest(path: Option<&Path>) -> Result<Manifest> {
    let Some(path) = path else {
        return Ok(Manifest::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    let manifest: Manifest = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse manifest JSON: {}", path.display()))?;
    manifest
        .validate()
        .with_context(|| format!("Invalid manifest: {}", path.display()))?;
    Ok(manifest)
}

/// Reads the `SYMFONY_REQUIRE` override; empty values count as unset.
#[must_use]
pub fn symfony_require_from_env() -> Option<String> {
    env::var(SYMFONY_REQUIRE_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Registers every `(name, constraint)` pair.
pub fn register_constraints(tags: &LegacyTagsManager, constraints: &[(String, String)]) -> Result<()> {
    for (name, constraint) in constraints {
        tags.add_constraint(name, constraint)
            .with_context(|| format!("Invalid legacy-tags constraint for {name}"))?;
    }
    Ok(())
}

/// Parses a `name=constraint` command-line pair.
pub fn parse_require_pair(pair: &str) -> Result<(String, String)> {
    let Some((name, constraint)) = pair.split_once('=') else {
        bail!("Expected NAME=CONSTRAINT, got `{pair}`");
    };
    let (name, constraint) = (name.trim(), constraint.trim());
    if name.is_empty() || constraint.is_empty() {
        bail!("Expected NAME=CONSTRAINT, got `{pair}`");
    }
    Ok((name.to_string(), constraint.to_string()))
}

/// Effective settings of one `prefetch` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Artifact cache directory.
    pub cache_dir: PathBuf,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    pub read_timeout_secs: u64,
    /// Handlers allowed in flight.
    pub max_nesting: usize,
    /// A native accelerator already prefetches listings.
    pub accelerator_active: bool,
}

/// Merges CLI flags over the manifest over defaults.
#[must_use]
pub fn resolve_run_config(args: &PrefetchArgs, manifest: &Manifest) -> RunConfig {
    let config = &manifest.config;
    RunConfig {
        cache_dir: resolve_cache_dir(
            args.cache_dir.as_deref(),
            config.cache_dir.as_deref(),
            env_var_non_empty_os("XDG_CACHE_HOME"),
            env_var_non_empty_os("HOME"),
        ),
        connect_timeout_secs: args
            .connect_timeout
            .or(config.connect_timeout)
            .unwrap_or(CONNECT_TIMEOUT_SECS),
        read_timeout_secs: args
            .read_timeout
            .or(config.read_timeout)
            .unwrap_or(READ_TIMEOUT_SECS),
        max_nesting: args
            .max_nesting
            .map(usize::from)
            .or(config.max_nesting)
            .unwrap_or(DEFAULT_MAX_NESTING),
        accelerator_active: config.accelerator.unwrap_or(false),
    }
}

/// Resolves the cache directory.
///
/// Priority:
/// 1. `--cache-dir`
/// 2. manifest `config.cache-dir`
/// 3. `$XDG_CACHE_HOME/prefetcher`
/// 4. `$HOME/.cache/prefetcher`
/// 5. `.prefetcher-cache`
#[must_use]
pub fn resolve_cache_dir(
    cli: Option<&Path>,
    manifest: Option<&Path>,
    xdg_cache_home: Option<OsString>,
    home: Option<OsString>,
) -> PathBuf {
    if let Some(path) = cli.or(manifest) {
        return path.to_path_buf();
    }
    if let Some(xdg) = xdg_cache_home {
        return PathBuf::from(xdg).join("prefetcher");
    }
    if let Some(home) = home {
        return PathBuf::from(home).join(".cache").join("prefetcher");
    }
    PathBuf::from(".prefetcher-cache")
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
