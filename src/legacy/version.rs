//! Version normalization for package-manager version strings.
//!
//! Versions in provider listings come in several shapes: release tags
//! (`v3.4.1`), normalized four-part versions (`3.4.1.0`), pre-releases
//! (`4.0.0-BETA2`), numbered dev branches (`3.4.x-dev`) and named branches
//! (`dev-master`). [`NormalizedVersion::parse`] folds all of them into one
//! ordered representation so constraints can be checked against them.
//!
//! # Example
//!
//! ```
//! use prefetcher_core::legacy::NormalizedVersion;
//!
//! let tag = NormalizedVersion::parse("v3.4").unwrap();
//! assert_eq!(tag.to_string(), "3.4.0.0");
//!
//! let branch = NormalizedVersion::parse("3.5.x-dev").unwrap();
//! assert_eq!(branch.to_string(), "3.5.9999999.9999999-dev");
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use super::error::VersionError;

/// Component value used for wildcard parts of numbered dev branches.
pub const BRANCH_WILDCARD: u64 = 9_999_999;

/// Release versions with an optional stability modifier and dev suffix.
#[allow(clippy::expect_used)]
static CLASSICAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^v?(\d{1,5})(\.\d+)?(\.\d+)?(\.\d+)?(?:[._-]?(stable|beta|b|rc|alpha|a|patch|pl|p)((?:[.-]?\d+)*)?)?([.-]?dev)?$",
    )
    .expect("classical version regex is valid")
});

/// Numbered branch stems such as `3.4.x`.
#[allow(clippy::expect_used)]
static BRANCH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^v?(\d+)(\.(?:\d+|[x*]))?(\.(?:\d+|[x*]))?(\.(?:\d+|[x*]))?$")
        .expect("branch version regex is valid")
});

#[allow(clippy::expect_used)]
static DEV_SUFFIX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.*?)[.-]?dev$").expect("dev suffix regex is valid")
});

/// Release stability, ordered from least to most stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stability {
    /// Development snapshot (`-dev`).
    Dev,
    /// Alpha pre-release.
    Alpha,
    /// Beta pre-release.
    Beta,
    /// Release candidate.
    Rc,
    /// Final release.
    Stable,
    /// Patch level on top of a final release.
    Patch,
}

impl Stability {
    fn from_modifier(modifier: &str) -> Self {
        match modifier.to_ascii_lowercase().as_str() {
            "alpha" | "a" => Self::Alpha,
            "beta" | "b" => Self::Beta,
            "rc" => Self::Rc,
            "patch" | "pl" | "p" => Self::Patch,
            _ => Self::Stable,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Rc => "RC",
            Self::Stable => "stable",
            Self::Patch => "patch",
        }
    }
}

/// A version normalized to either four numeric components or a branch name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NormalizedVersion {
    /// Orderable version: `major.minor.patch.build` plus stability.
    Numeric {
        /// The four numeric components.
        parts: [u64; 4],
        /// Stability of the release.
        stability: Stability,
        /// Numbers following the stability modifier (`beta2` → `[2]`).
        stability_number: Vec<u64>,
        /// Whether a pre-release is itself a dev snapshot (`1.0.0-beta1-dev`).
        dev: bool,
    },
    /// Named branch (`dev-master` → `master`).
    Branch(String),
}

impl NormalizedVersion {
    /// Normalizes a version string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Invalid`] when the string is neither a
    /// release version, a numbered dev branch nor a named branch.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let mut version = input.trim();
        if version.is_empty() {
            return Err(VersionError::invalid(input, "empty version string"));
        }

        // Inline aliases (`dev-master as 1.0.x-dev`) resolve to the aliased side.
        if let Some((real, _alias)) = version.split_once(" as ") {
            version = real.trim();
        }
        // Stability flags (`1.0@beta`) don't change the version itself.
        if let Some((real, _flag)) = version.split_once('@') {
            version = real.trim();
        }

        let lower = version.to_ascii_lowercase();
        if matches!(lower.as_str(), "master" | "trunk" | "default") {
            return Ok(Self::Branch(lower));
        }
        if lower.starts_with("dev-") {
            let name = &version[4..];
            if name.is_empty() {
                return Err(VersionError::invalid(input, "empty branch name"));
            }
            return Ok(Self::Branch(name.to_string()));
        }

        if let Some(caps) = CLASSICAL_PATTERN.captures(version) {
            let mut parts = [0u64; 4];
            for (index, part) in parts.iter_mut().enumerate() {
                if let Some(m) = caps.get(index + 1) {
                    *part = parse_component(m.as_str().trim_start_matches('.'), input)?;
                }
            }
            let dev_suffix = caps.get(7).is_some();
            let (stability, stability_number, dev) = match caps.get(5) {
                Some(modifier) => {
                    let stability = Stability::from_modifier(modifier.as_str());
                    let numbers = caps
                        .get(6)
                        .map(|m| parse_modifier_numbers(m.as_str(), input))
                        .transpose()?
                        .unwrap_or_default();
                    (stability, numbers, dev_suffix)
                }
                None if dev_suffix => (Stability::Dev, Vec::new(), false),
                None => (Stability::Stable, Vec::new(), false),
            };
            return Ok(Self::Numeric {
                parts,
                stability,
                stability_number,
                dev,
            });
        }

        if let Some(caps) = DEV_SUFFIX_PATTERN.captures(version) {
            let stem = caps.get(1).map_or("", |m| m.as_str());
            if let Some(branch) = Self::parse_numbered_branch(stem, input)? {
                return Ok(branch);
            }
        }

        Err(VersionError::invalid(input, "unrecognized version format"))
    }

    /// Parses `3.4.x` style branch stems into `3.4.9999999.9999999-dev`.
    fn parse_numbered_branch(stem: &str, input: &str) -> Result<Option<Self>, VersionError> {
        let Some(caps) = BRANCH_PATTERN.captures(stem) else {
            return Ok(None);
        };
        let mut parts = [BRANCH_WILDCARD; 4];
        for (index, part) in parts.iter_mut().enumerate() {
            if let Some(m) = caps.get(index + 1) {
                let raw = m.as_str().trim_start_matches('.');
                if !raw.eq_ignore_ascii_case("x") && raw != "*" {
                    *part = parse_component(raw, input)?;
                }
            }
        }
        Ok(Some(Self::Numeric {
            parts,
            stability: Stability::Dev,
            stability_number: Vec::new(),
            dev: false,
        }))
    }

    /// Builds a stable numeric version from its components.
    #[must_use]
    pub fn from_parts(parts: [u64; 4]) -> Self {
        Self::Numeric {
            parts,
            stability: Stability::Stable,
            stability_number: Vec::new(),
            dev: false,
        }
    }

    /// Returns the same version with `-dev` stability (lowest possible
    /// version for those components).
    #[must_use]
    pub fn as_dev_lower_bound(&self) -> Self {
        match self {
            Self::Numeric { parts, .. } => Self::Numeric {
                parts: *parts,
                stability: Stability::Dev,
                stability_number: Vec::new(),
                dev: false,
            },
            Self::Branch(name) => Self::Branch(name.clone()),
        }
    }

    /// Returns `true` for named branches, which only compare by equality.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(self, Self::Branch(_))
    }

    /// Returns the stability, or `None` for named branches.
    #[must_use]
    pub fn stability(&self) -> Option<Stability> {
        match self {
            Self::Numeric { stability, .. } => Some(*stability),
            Self::Branch(_) => None,
        }
    }

    /// Orders two versions; named branches are only comparable to equal branches.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (
                Self::Numeric {
                    parts: a_parts,
                    stability: a_stability,
                    stability_number: a_number,
                    dev: a_dev,
                },
                Self::Numeric {
                    parts: b_parts,
                    stability: b_stability,
                    stability_number: b_number,
                    dev: b_dev,
                },
            ) => Some(
                a_parts
                    .cmp(b_parts)
                    .then(a_stability.cmp(b_stability))
                    .then_with(|| a_number.cmp(b_number))
                    // `-beta1-dev` sorts before `-beta1`
                    .then(b_dev.cmp(a_dev)),
            ),
            (Self::Branch(a), Self::Branch(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl fmt::Display for NormalizedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric {
                parts,
                stability,
                stability_number,
                dev,
            } => {
                write!(f, "{}.{}.{}.{}", parts[0], parts[1], parts[2], parts[3])?;
                if *stability != Stability::Stable {
                    write!(f, "-{}", stability.label())?;
                    for number in stability_number {
                        write!(f, "{number}")?;
                    }
                }
                if *dev {
                    write!(f, "-dev")?;
                }
                Ok(())
            }
            Self::Branch(name) => write!(f, "dev-{name}"),
        }
    }
}

fn parse_component(raw: &str, input: &str) -> Result<u64, VersionError> {
    raw.parse::<u64>()
        .map_err(|_| VersionError::invalid(input, "numeric component out of range"))
}

fn parse_modifier_numbers(raw: &str, input: &str) -> Result<Vec<u64>, VersionError> {
    raw.split(['.', '-'])
        .filter(|segment| !segment.is_empty())
        .map(|segment| parse_component(segment, input))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn normalize(input: &str) -> String {
        NormalizedVersion::parse(input).unwrap().to_string()
    }

    #[test]
    fn test_normalize_release_versions() {
        assert_eq!(normalize("1"), "1.0.0.0");
        assert_eq!(normalize("v3.4"), "3.4.0.0");
        assert_eq!(normalize("3.4.1"), "3.4.1.0");
        assert_eq!(normalize("3.4.1.0"), "3.4.1.0");
        assert_eq!(normalize("V2.0.0"), "2.0.0.0");
    }

    #[test]
    fn test_normalize_pre_releases() {
        assert_eq!(normalize("4.0.0-BETA2"), "4.0.0.0-beta2");
        assert_eq!(normalize("4.0.0-RC1"), "4.0.0.0-RC1");
        assert_eq!(normalize("1.0.0alpha3"), "1.0.0.0-alpha3");
        assert_eq!(normalize("1.0.0-beta1-dev"), "1.0.0.0-beta1-dev");
        assert_eq!(normalize("1.0-dev"), "1.0.0.0-dev");
    }

    #[test]
    fn test_normalize_numbered_branches() {
        assert_eq!(normalize("3.5.x-dev"), "3.5.9999999.9999999-dev");
        assert_eq!(normalize("4.x-dev"), "4.9999999.9999999.9999999-dev");
        assert_eq!(normalize("2.1.*-dev"), "2.1.9999999.9999999-dev");
    }

    #[test]
    fn test_normalize_named_branches() {
        assert_eq!(normalize("dev-master"), "dev-master");
        assert_eq!(normalize("master"), "dev-master");
        assert_eq!(normalize("dev-feature/login"), "dev-feature/login");
    }

    #[test]
    fn test_normalize_strips_alias_and_flags() {
        assert_eq!(normalize("1.2.0 as 1.1.0"), "1.2.0.0");
        assert_eq!(normalize("2.0@beta"), "2.0.0.0");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(NormalizedVersion::parse("").is_err());
        assert!(NormalizedVersion::parse("not a version").is_err());
        assert!(NormalizedVersion::parse("dev-").is_err());
    }

    #[test]
    fn test_ordering_by_stability() {
        let versions = [
            "1.0.0-dev",
            "1.0.0-alpha1",
            "1.0.0-beta1-dev",
            "1.0.0-beta1",
            "1.0.0-beta2",
            "1.0.0-RC1",
            "1.0.0",
            "1.0.0-patch1",
            "1.0.1",
        ];
        for pair in versions.windows(2) {
            let lower = NormalizedVersion::parse(pair[0]).unwrap();
            let upper = NormalizedVersion::parse(pair[1]).unwrap();
            assert_eq!(
                lower.compare(&upper),
                Some(Ordering::Less),
                "{} should sort before {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_branches_only_compare_to_themselves() {
        let master = NormalizedVersion::parse("dev-master").unwrap();
        let release = NormalizedVersion::parse("1.0.0").unwrap();
        assert_eq!(master.compare(&master.clone()), Some(Ordering::Equal));
        assert_eq!(master.compare(&release), None);
        assert!(master.is_branch());
        assert_eq!(master.stability(), None);
    }

    #[test]
    fn test_dev_lower_bound() {
        let version = NormalizedVersion::parse("3.4").unwrap();
        assert_eq!(version.as_dev_lower_bound().to_string(), "3.4.0.0-dev");
    }
}
