//! Transfer URL rewrites for known hosts.

use std::sync::LazyLock;

use regex::Regex;

/// GitHub API zipball URLs; the codeload host serves the same archive without
/// the API redirect.
#[allow(clippy::expect_used)]
static GITHUB_ZIPBALL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://api\.github\.com/repos/([^/]+)/([^/]+)/zipball/(.+)$")
        .expect("GitHub zipball regex is valid")
});

/// Rewrites `url` to a faster equivalent transfer URL when one is known.
///
/// The cache destination must be derived from the URL before this rewrite,
/// so prefetched files land where the installer looks for them.
#[must_use]
pub fn transfer_url(url: &str) -> String {
    match GITHUB_ZIPBALL_PATTERN.captures(url) {
        Some(caps) => format!(
            "https://codeload.github.com/{}/{}/legacy.zip/{}",
            &caps[1], &caps[2], &caps[3]
        ),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_zipball_goes_to_codeload() {
        assert_eq!(
            transfer_url("https://api.github.com/repos/symfony/console/zipball/4f3b5a8e"),
            "https://codeload.github.com/symfony/console/legacy.zip/4f3b5a8e"
        );
    }

    #[test]
    fn test_other_urls_are_unchanged() {
        for url in [
            "https://codeload.github.com/symfony/console/legacy.zip/4f3b5a8e",
            "https://api.github.com/repos/symfony/console/tarball/4f3b5a8e",
            "http://api.github.com/repos/symfony/console/zipball/4f3b5a8e",
            "https://repo.example/dist/acme/widget.zip",
        ] {
            assert_eq!(transfer_url(url), url);
        }
    }
}
