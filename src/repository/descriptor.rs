//! Repository descriptors as declared in the project manifest.

use serde::{Deserialize, Serialize};

/// URL of the default public repository.
pub const PACKAGIST_URL: &str = "https://repo.packagist.org";

/// A repository entry from the manifest's `repositories` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    /// Repository type (`composer`, `vcs`, `path`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Base URL of the repository.
    #[serde(default)]
    pub url: String,
    /// Providers are resolved lazily by the host; listings cannot be prefetched.
    #[serde(rename = "force-lazy-providers", default)]
    pub force_lazy_providers: bool,
}

impl RepositoryDescriptor {
    /// A `composer` repository at `url`.
    pub fn composer(url: impl Into<String>) -> Self {
        Self {
            kind: "composer".to_string(),
            url: url.into(),
            force_lazy_providers: false,
        }
    }

    /// The default public repository.
    #[must_use]
    pub fn packagist() -> Self {
        Self::composer(PACKAGIST_URL)
    }

    /// Whether provider listings of this repository can be prefetched.
    ///
    /// Only `composer` repositories served over http(s) without lazy
    /// providers qualify.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        let url = self.url.to_ascii_lowercase();
        self.kind == "composer"
            && (url.starts_with("http://") || url.starts_with("https://"))
            && !self.force_lazy_providers
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_eligibility_rules() {
        assert!(RepositoryDescriptor::packagist().is_eligible());
        assert!(RepositoryDescriptor::composer("http://mirror.local/repo").is_eligible());
        assert!(RepositoryDescriptor::composer("HTTPS://Mirror.Local").is_eligible());

        assert!(!RepositoryDescriptor::composer("file:///srv/repo").is_eligible());
        assert!(!RepositoryDescriptor::composer("").is_eligible());

        let mut lazy = RepositoryDescriptor::packagist();
        lazy.force_lazy_providers = true;
        assert!(!lazy.is_eligible());

        let mut vcs = RepositoryDescriptor::composer("https://github.com/acme/widget");
        vcs.kind = "vcs".to_string();
        assert!(!vcs.is_eligible());
    }

    #[test]
    fn test_deserializes_manifest_entry() {
        let descriptor: RepositoryDescriptor = serde_json::from_str(
            r#"{"type": "composer", "url": "https://repo.example", "force-lazy-providers": true}"#,
        )
        .unwrap();
        assert_eq!(descriptor.kind, "composer");
        assert!(descriptor.force_lazy_providers);

        let path: RepositoryDescriptor = serde_json::from_str(r#"{"type": "path"}"#).unwrap();
        assert!(path.url.is_empty());
        assert!(!path.is_eligible());
    }
}
