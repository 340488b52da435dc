//! Package and operation shapes handed over by the host.
//!
//! Only the fields the prefetcher reads are modelled; unknown fields are
//! ignored so a full lock-file entry deserializes as well.

use serde::{Deserialize, Serialize};

/// Where a package is installed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallationSource {
    /// Distribution archive.
    Dist,
    /// VCS checkout; nothing to prefetch.
    Source,
}

/// An alternative download location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    /// URL template with `%package%`, `%version%`, `%reference%`, `%type%`.
    pub url: String,
    /// Preferred mirrors are tried before the primary URL.
    #[serde(default)]
    pub preferred: bool,
}

/// Distribution archive of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dist {
    /// Archive type (`zip`, `tar`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Primary download URL.
    pub url: String,
    /// VCS reference the archive was built from.
    #[serde(default)]
    pub reference: Option<String>,
    /// Mirrors of the archive.
    #[serde(default)]
    pub mirrors: Vec<Mirror>,
}

/// A package as seen by the prefetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// `vendor/name`.
    pub name: String,
    /// Pretty version string.
    pub version: String,
    /// Package type; `metapackage` has no files.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// Distribution archive, if any.
    #[serde(default)]
    pub dist: Option<Dist>,
    /// Installation source chosen by the host.
    #[serde(rename = "installation-source", default)]
    pub installation_source: Option<InstallationSource>,
}

fn default_kind() -> String {
    "library".to_string()
}

impl Package {
    /// Whether the package ships no files.
    #[must_use]
    pub fn is_metapackage(&self) -> bool {
        self.kind == "metapackage"
    }

    /// Archive type, empty without a dist.
    #[must_use]
    pub fn dist_type(&self) -> &str {
        self.dist.as_ref().map_or("", |dist| dist.kind.as_str())
    }

    /// Download URLs in the order they should be tried.
    ///
    /// Preferred mirrors come first, then the primary URL, then the remaining
    /// mirrors. Mirror placeholders are expanded.
    #[must_use]
    pub fn dist_urls(&self) -> Vec<String> {
        let Some(dist) = &self.dist else {
            return Vec::new();
        };
        let (preferred, fallback): (Vec<&Mirror>, Vec<&Mirror>) =
            dist.mirrors.iter().partition(|mirror| mirror.preferred);

        let mut urls: Vec<String> = preferred
            .into_iter()
            .map(|mirror| self.expand(&mirror.url, dist))
            .collect();
        if !dist.url.is_empty() {
            urls.push(dist.url.clone());
        }
        urls.extend(fallback.into_iter().map(|mirror| self.expand(&mirror.url, dist)));
        urls
    }

    fn expand(&self, template: &str, dist: &Dist) -> String {
        template
            .replace("%package%", &self.name)
            .replace("%version%", &self.version)
            .replace("%reference%", dist.reference.as_deref().unwrap_or_default())
            .replace("%type%", &dist.kind)
    }
}

/// A pending change computed by the host's solver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "lowercase")]
pub enum Operation {
    /// Install a new package.
    Install {
        /// Package to install.
        package: Package,
    },
    /// Replace `initial` with `target`.
    Update {
        /// Currently installed package.
        initial: Package,
        /// Package to install.
        target: Package,
    },
    /// Remove a package.
    Uninstall {
        /// Package to remove.
        package: Package,
    },
}

impl Operation {
    /// Package whose archive the operation needs, if any.
    #[must_use]
    pub fn target(&self) -> Option<&Package> {
        match self {
            Self::Install { package } => Some(package),
            Self::Update { target, .. } => Some(target),
            Self::Uninstall { .. } => None,
        }
    }
}
