//! Legacy-tag filtering: version normalization, constraint matching and the
//! provider-listing filter built on them.
//!
//! # Example
//!
//! ```
//! use prefetcher_core::legacy::LegacyTagsManager;
//! use serde_json::json;
//!
//! let manager = LegacyTagsManager::new();
//! manager.add_constraint("symfony/symfony", "~3.4").unwrap();
//!
//! let listing = json!({"packages": {"symfony/symfony": {
//!     "3.3.0": {"version_normalized": "3.3.0.0"},
//!     "3.4.0": {"version_normalized": "3.4.0.0"}
//! }}});
//! let filtered = manager.filter(&listing);
//! assert!(filtered["packages"]["symfony/symfony"].get("3.3.0").is_none());
//! ```

mod constraint;
mod error;
mod tags;
mod version;

pub use constraint::{Comparator, Operator, VersionConstraint};
pub use error::{ConstraintError, VersionError};
pub use tags::LegacyTagsManager;
pub use version::{BRANCH_WILDCARD, NormalizedVersion, Stability};
