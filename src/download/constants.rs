//! Constants for the download module (timeouts, nesting, progress cadence).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large archives).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Upper bound accepted for either timeout (1 hour).
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Default cap on simultaneously running request handlers.
pub const DEFAULT_MAX_NESTING: usize = 5;

/// Smallest accepted nesting cap.
pub const MIN_NESTING: usize = 1;

/// Largest accepted nesting cap.
pub const MAX_NESTING: usize = 100;

/// A progress line is emitted at least this often while bytes keep flowing.
pub const PROGRESS_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Suffix of the temporary file a download streams into before the rename.
pub const PARTIAL_SUFFIX: &str = "part";
