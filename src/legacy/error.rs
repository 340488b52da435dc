//! Error types for version and constraint parsing.

use thiserror::Error;

/// A version string that could not be normalized.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The input is not a release version, numbered dev branch or named branch.
    #[error("invalid version \"{input}\": {reason}")]
    Invalid {
        /// The original input string.
        input: String,
        /// Why the input was rejected.
        reason: &'static str,
    },
}

impl VersionError {
    /// Creates an invalid version error.
    pub fn invalid(input: impl Into<String>, reason: &'static str) -> Self {
        Self::Invalid {
            input: input.into(),
            reason,
        }
    }
}

/// A constraint expression that could not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    /// The expression was empty or only whitespace.
    #[error("empty version constraint")]
    Empty,

    /// The expression contains an operator or version that cannot be parsed.
    #[error("invalid version constraint \"{constraint}\": {reason}")]
    Invalid {
        /// The full constraint expression.
        constraint: String,
        /// Why the expression was rejected.
        reason: String,
    },
}

impl ConstraintError {
    /// Creates an invalid constraint error.
    pub fn invalid(constraint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            constraint: constraint.into(),
            reason: reason.into(),
        }
    }
}
