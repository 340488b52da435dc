//! Legacy-tag filtering for provider listings.
//!
//! Monorepo packages that were later split into standalone packages keep
//! listing every historical version in their provider files. When the root
//! project pins such a package (`symfony/symfony: ~3.4`), versions outside
//! that range are dead weight for the resolver. [`LegacyTagsManager`] drops
//! them, together with the matching versions of every package the monorepo
//! `replace`s.
//!
//! Listings are JSON documents shaped like
//! `{"packages": {"vendor/name": {"1.0.0": {...}}}}`, or the array form where
//! each package maps to a list of version objects carrying their own
//! `version` field. Both shapes are filtered in place of their entries, so
//! key order and untouched packages are preserved exactly.
//!
//! Array listings marked `"minified": "composer/2.0"` only store the fields
//! that differ from the previous entry. Such packages are expanded before
//! filtering and minified again afterwards, so surviving versions keep every
//! field they inherited.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::constraint::VersionConstraint;
use super::error::ConstraintError;
use super::version::NormalizedVersion;

/// Branch names that stay in every listing regardless of constraints.
const DEFAULT_BRANCHES: [&str; 4] = ["dev-master", "dev-main", "dev-trunk", "dev-default"];

/// Marker value of the top-level `minified` field for diff-encoded listings.
const MINIFIED_FORMAT: &str = "composer/2.0";

/// Field value that removes an inherited key in a minified entry.
const UNSET: &str = "__unset";

/// Registry of root constraints plus the filter that applies them.
#[derive(Debug, Default)]
pub struct LegacyTagsManager {
    constraints: RwLock<BTreeMap<String, VersionConstraint>>,
}

impl LegacyTagsManager {
    /// Creates an empty manager; filtering is a no-op until a constraint is added.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `expression` as the root constraint for `package`.
    ///
    /// Registering the same package twice replaces the earlier constraint.
    ///
    /// # Errors
    ///
    /// Returns [`ConstraintError`] when the expression cannot be parsed; the
    /// registry is left unchanged in that case.
    pub fn add_constraint(&self, package: &str, expression: &str) -> Result<(), ConstraintError> {
        let constraint = VersionConstraint::parse(expression)?;
        let name = package.trim().to_ascii_lowercase();
        debug!(package = %name, constraint = %constraint, "registered legacy-tags constraint");
        self.write().insert(name, constraint);
        Ok(())
    }

    /// Returns the constraint registered for `package`, if any.
    #[must_use]
    pub fn constraint(&self, package: &str) -> Option<VersionConstraint> {
        self.read().get(&package.to_ascii_lowercase()).cloned()
    }

    /// Returns `true` when no constraint is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Clears every registered constraint.
    pub fn reset(&self) {
        self.write().clear();
    }

    /// Returns whether `file_id` names a provider file that filtering may touch.
    ///
    /// The package name is derived from the file identifier
    /// (`provider-vendor$name.json`, `provider-vendor~name.json`,
    /// `p/vendor/name$hash.json`, `p2/vendor/name.json`). A file matches when a
    /// registered package has the same name or the same vendor, since split
    /// packages share the vendor of the monorepo that replaces them.
    #[must_use]
    pub fn has_provider(&self, file_id: &str) -> bool {
        let Some(name) = provider_name(file_id) else {
            return false;
        };
        let vendor = vendor_of(&name);
        self.read()
            .keys()
            .any(|registered| *registered == name || vendor_of(registered) == vendor)
    }

    /// Returns a filtered copy of `listing`; the input is not modified.
    #[must_use]
    pub fn filter(&self, listing: &Value) -> Value {
        let mut filtered = listing.clone();
        self.apply(&mut filtered);
        filtered
    }

    /// Filters `listing` in place and returns whether any entry was removed.
    pub fn apply(&self, listing: &mut Value) -> bool {
        let minified = listing.get("minified").and_then(Value::as_str) == Some(MINIFIED_FORMAT);
        let Some(packages) = listing.get_mut("packages").and_then(Value::as_object_mut) else {
            return false;
        };

        // originals of expanded packages, restored when nothing was removed
        let mut originals: BTreeMap<String, Value> = BTreeMap::new();
        if minified {
            for (name, versions) in packages.iter_mut() {
                if let Some(list) = versions.as_array() {
                    let expanded = Value::Array(expand_versions(list));
                    originals.insert(name.clone(), std::mem::replace(versions, expanded));
                }
            }
        }
        let mut touched: BTreeSet<String> = BTreeSet::new();

        let constraints = self.read();
        let mut changed = false;
        for (parent, constraint) in constraints.iter() {
            let Some(parent_versions) = packages.get(parent) else {
                continue;
            };
            if !any_matches(parent_versions, constraint) {
                continue;
            }

            let mut targets = vec![parent.clone()];
            targets.extend(replaced_packages(parent_versions, parent));

            let mut removed = 0usize;
            for target in &targets {
                let Some(versions) = packages.get_mut(target) else {
                    continue;
                };
                if !any_matches(versions, constraint) {
                    continue;
                }
                let dropped = retain_matching(versions, constraint);
                if dropped > 0 {
                    touched.insert(target.clone());
                }
                removed += dropped;
            }

            if removed > 0 {
                changed = true;
                info!(
                    removed,
                    "restricting packages listed in \"{parent}\" to \"{constraint}\""
                );
            }
        }

        for (name, original) in originals {
            let Some(versions) = packages.get_mut(&name) else {
                continue;
            };
            match versions {
                Value::Array(list) if touched.contains(&name) => *list = minify_versions(list),
                _ => *versions = original,
            }
        }
        changed
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, VersionConstraint>> {
        self.constraints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, VersionConstraint>> {
        self.constraints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Iterates `(version key, metadata)` pairs of either listing shape.
fn entries(versions: &Value) -> Box<dyn Iterator<Item = (&str, &Value)> + '_> {
    match versions {
        Value::Object(map) => Box::new(map.iter().map(|(key, meta)| (key.as_str(), meta))),
        Value::Array(list) => Box::new(list.iter().filter_map(|meta| {
            meta.get("version")
                .and_then(Value::as_str)
                .map(|key| (key, meta))
        })),
        _ => Box::new(std::iter::empty()),
    }
}

/// Resolves the version an entry stands for: its branch alias, then its
/// normalized version, then its key. `None` for named branches.
fn classify(key: &str, meta: &Value) -> Option<NormalizedVersion> {
    let alias = meta
        .pointer("/extra/branch-alias")
        .and_then(|aliases| aliases.get(key))
        .and_then(Value::as_str);
    let normalized = meta.get("version_normalized").and_then(Value::as_str);

    [alias, normalized, Some(key)]
        .into_iter()
        .flatten()
        .find_map(|candidate| NormalizedVersion::parse(candidate).ok())
        .filter(|version| !version.is_branch())
}

fn is_default_branch(key: &str, meta: &Value) -> bool {
    DEFAULT_BRANCHES.contains(&key)
        || meta.get("default-branch").and_then(Value::as_bool) == Some(true)
}

fn any_matches(versions: &Value, constraint: &VersionConstraint) -> bool {
    entries(versions).any(|(key, meta)| {
        classify(key, meta).is_some_and(|version| constraint.matches(&version))
    })
}

fn keep(key: &str, meta: &Value, constraint: &VersionConstraint) -> bool {
    if is_default_branch(key, meta) {
        return true;
    }
    classify(key, meta).is_none_or(|version| constraint.matches(&version))
}

/// Drops failing entries and returns how many were removed.
fn retain_matching(versions: &mut Value, constraint: &VersionConstraint) -> usize {
    match versions {
        Value::Object(map) => {
            let before = map.len();
            map.retain(|key, meta| keep(key, meta, constraint));
            before - map.len()
        }
        Value::Array(list) => {
            let before = list.len();
            list.retain(|meta| match meta.get("version").and_then(Value::as_str) {
                Some(key) => keep(key, meta, constraint),
                None => true,
            });
            before - list.len()
        }
        _ => 0,
    }
}

/// Rebuilds full version objects from a minified list: each entry
/// inherits the fields of the one before it, `"__unset"` removes a field.
fn expand_versions(list: &[Value]) -> Vec<Value> {
    let mut expanded = Vec::with_capacity(list.len());
    let mut current: Option<Map<String, Value>> = None;
    for entry in list {
        let Value::Object(fields) = entry else {
            expanded.push(entry.clone());
            continue;
        };
        let next = match current.take() {
            None => fields.clone(),
            Some(mut base) => {
                for (key, value) in fields {
                    if value.as_str() == Some(UNSET) {
                        base.remove(key);
                    } else {
                        base.insert(key.clone(), value.clone());
                    }
                }
                base
            }
        };
        expanded.push(Value::Object(next.clone()));
        current = Some(next);
    }
    expanded
}

/// Inverse of [`expand_versions`]: keeps the first entry whole and stores
/// only the differences for the following ones.
fn minify_versions(list: &[Value]) -> Vec<Value> {
    let mut minified = Vec::with_capacity(list.len());
    let mut previous: Option<&Map<String, Value>> = None;
    for entry in list {
        let Value::Object(fields) = entry else {
            minified.push(entry.clone());
            continue;
        };
        let Some(last) = previous else {
            minified.push(entry.clone());
            previous = Some(fields);
            continue;
        };
        let mut diff = Map::new();
        for (key, value) in fields {
            if last.get(key) != Some(value) {
                diff.insert(key.clone(), value.clone());
            }
        }
        for key in last.keys() {
            if !fields.contains_key(key) {
                diff.insert(key.clone(), Value::String(UNSET.to_string()));
            }
        }
        minified.push(Value::Object(diff));
        previous = Some(fields);
    }
    minified
}

/// Packages replaced by any version of `parent`.
fn replaced_packages(parent_versions: &Value, parent: &str) -> BTreeSet<String> {
    entries(parent_versions)
        .filter_map(|(_, meta)| meta.get("replace").and_then(Value::as_object))
        .flat_map(|replace| replace.keys())
        .map(|name| name.to_ascii_lowercase())
        .filter(|name| name != parent)
        .collect()
}

fn vendor_of(name: &str) -> &str {
    name.split_once('/').map_or(name, |(vendor, _)| vendor)
}

/// Derives `vendor/name` from a provider cache file identifier.
fn provider_name(file_id: &str) -> Option<String> {
    let normalized = file_id.replace('\\', "/");
    let stem = normalized.strip_suffix(".json")?;
    let segments: Vec<&str> = stem.split('/').filter(|s| !s.is_empty()).collect();
    let last = *segments.last()?;

    let (vendor, package) = if let Some(flat) = last.strip_prefix("provider-") {
        let (vendor, rest) = flat.split_once(['$', '~'])?;
        (vendor, rest)
    } else if segments.len() >= 3 && matches!(segments[segments.len() - 3], "p" | "p2") {
        (segments[segments.len() - 2], last)
    } else {
        return None;
    };

    // Trailing `$hash` or `~dev` markers are not part of the name.
    let package = package
        .split_once(['$', '~'])
        .map_or(package, |(name, _)| name);
    if vendor.is_empty() || package.is_empty() {
        return None;
    }
    Some(format!("{vendor}/{package}").to_ascii_lowercase())
}
