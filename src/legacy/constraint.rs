//! Version constraint expressions (`~3.4`, `^2.1 || ^3.0`, `>=1.0 <2.0`).
//!
//! A constraint is a disjunction of conjunctions of single comparisons
//! against a [`NormalizedVersion`]. Operators, tilde and caret ranges,
//! wildcards and hyphen ranges all desugar to plain comparisons at parse
//! time, so matching is a straight evaluation.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use super::error::ConstraintError;
use super::version::{NormalizedVersion, Stability};

#[allow(clippy::expect_used)]
static OR_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\|\|?\s*").expect("or separator regex is valid"));

#[allow(clippy::expect_used)]
static HYPHEN_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<from>\S+)\s+-\s+(?P<to>\S+)$").expect("hyphen range regex is valid")
});

/// Operators followed by whitespace are glued to their operand before splitting.
#[allow(clippy::expect_used)]
static DETACHED_OPERATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(>=|<=|<>|!=|==|=|<|>|~|\^)\s+").expect("detached operator regex is valid")
});

/// Numeric operand of a tilde, caret or hyphen bound; group 5 holds any
/// stability modifier or dev suffix.
#[allow(clippy::expect_used)]
static RANGE_OPERAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^v?(\d+)(?:\.(\d+))?(?:\.(\d+))?(?:\.(\d+))?((?:[._-]?(?:stable|beta|b|rc|alpha|a|patch|pl|p)(?:[.-]?\d+)*)?(?:[.-]?dev)?)$",
    )
    .expect("range operand regex is valid")
});

#[allow(clippy::expect_used)]
static WILDCARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(\d+)(?:\.(\d+))?(?:\.(\d+))?(?:\.[xX*])+$").expect("wildcard regex is valid")
});

#[allow(clippy::expect_used)]
static MATCH_ALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v?[xX*](?:\.[xX*])*$").expect("match-all regex is valid"));

#[allow(clippy::expect_used)]
static OPERATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(<>|!=|>=|<=|==|=|<|>)?(.+)$").expect("operator regex is valid")
});

/// Comparison operator of a single constraint term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `==` / `=` / bare version.
    Eq,
    /// `!=` / `<>`.
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Operator {
    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// One comparison such as `>= 3.4.0.0-dev`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    op: Operator,
    version: NormalizedVersion,
}

impl Comparator {
    fn new(op: Operator, version: NormalizedVersion) -> Self {
        Self { op, version }
    }

    /// Returns whether `candidate` satisfies this comparison.
    ///
    /// Named branches are only ordered against themselves, so `<`/`>` style
    /// operators never match them and `!=` always does.
    #[must_use]
    pub fn matches(&self, candidate: &NormalizedVersion) -> bool {
        let ordering = candidate.compare(&self.version);
        match self.op {
            Operator::Eq => ordering == Some(Ordering::Equal),
            Operator::Ne => ordering != Some(Ordering::Equal),
            Operator::Lt => ordering == Some(Ordering::Less),
            Operator::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            Operator::Gt => ordering == Some(Ordering::Greater),
            Operator::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.symbol(), self.version)
    }
}

/// A parsed constraint expression.
///
/// An empty conjunction matches everything (`*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    pretty: String,
    alternatives: Vec<Vec<Comparator>>,
}

impl VersionConstraint {
    /// Parses a constraint expression.
    ///
    /// # Errors
    ///
    /// Returns [`ConstraintError::Empty`] for blank input and
    /// [`ConstraintError::Invalid`] when any term is malformed.
    pub fn parse(expression: &str) -> Result<Self, ConstraintError> {
        let pretty = expression.trim();
        if pretty.is_empty() {
            return Err(ConstraintError::Empty);
        }

        let mut alternatives = Vec::new();
        for alternative in OR_SEPARATOR.split(pretty) {
            let alternative = alternative.trim();
            if alternative.is_empty() {
                return Err(ConstraintError::invalid(pretty, "empty alternative"));
            }
            alternatives.push(parse_conjunction(alternative, pretty)?);
        }

        Ok(Self {
            pretty: pretty.to_string(),
            alternatives,
        })
    }

    /// Returns whether `version` satisfies any alternative.
    #[must_use]
    pub fn matches(&self, version: &NormalizedVersion) -> bool {
        self.alternatives
            .iter()
            .any(|terms| terms.iter().all(|term| term.matches(version)))
    }

    /// The expression as it was written (trimmed).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pretty
    }

    /// Renders the desugared comparisons, e.g. `[>= 3.4.0.0-dev < 4.0.0.0-dev]`.
    #[must_use]
    pub fn describe(&self) -> String {
        let rendered: Vec<String> = self
            .alternatives
            .iter()
            .map(|terms| {
                if terms.is_empty() {
                    return "*".to_string();
                }
                let joined: Vec<String> = terms.iter().map(ToString::to_string).collect();
                format!("[{}]", joined.join(" "))
            })
            .collect();
        rendered.join(" || ")
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty)
    }
}

impl FromStr for VersionConstraint {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_conjunction(alternative: &str, whole: &str) -> Result<Vec<Comparator>, ConstraintError> {
    if let Some(caps) = HYPHEN_RANGE.captures(alternative) {
        let from = caps.name("from").map_or("", |m| m.as_str());
        let to = caps.name("to").map_or("", |m| m.as_str());
        return parse_hyphen_range(from, to, whole);
    }

    let glued = DETACHED_OPERATOR.replace_all(alternative, "$1");
    let mut terms = Vec::new();
    for token in glued.split([',', ' ', '\t']).filter(|t| !t.is_empty()) {
        terms.extend(parse_term(token, whole)?);
    }
    Ok(terms)
}

fn parse_term(token: &str, whole: &str) -> Result<Vec<Comparator>, ConstraintError> {
    let token = strip_flags(token);
    if token.is_empty() {
        return Err(ConstraintError::invalid(whole, "stability flag without version"));
    }

    if MATCH_ALL.is_match(token) {
        return Ok(Vec::new());
    }

    if let Some(operand) = token.strip_prefix('~') {
        if operand.starts_with('>') {
            return Err(ConstraintError::invalid(
                whole,
                "\"~>\" is not supported, use \"~\" instead",
            ));
        }
        return parse_tilde(operand, whole);
    }

    if let Some(operand) = token.strip_prefix('^') {
        return parse_caret(operand, whole);
    }

    if let Some(caps) = WILDCARD.captures(token) {
        let parts = captured_parts(&caps, 3, whole)?;
        let position = last_present(&caps, 3);
        let low = bump(parts, position, 0);
        let high = bump(parts, position, 1);
        if low == NormalizedVersion::from_parts([0; 4]).as_dev_lower_bound() {
            return Ok(vec![Comparator::new(Operator::Lt, high)]);
        }
        return Ok(vec![
            Comparator::new(Operator::Ge, low),
            Comparator::new(Operator::Lt, high),
        ]);
    }

    let Some(caps) = OPERATOR.captures(token) else {
        return Err(ConstraintError::invalid(whole, format!("cannot parse \"{token}\"")));
    };
    let op = match caps.get(1).map(|m| m.as_str()) {
        None | Some("=" | "==") => Operator::Eq,
        Some("!=" | "<>") => Operator::Ne,
        Some("<") => Operator::Lt,
        Some("<=") => Operator::Le,
        Some(">") => Operator::Gt,
        Some(">=") => Operator::Ge,
        Some(other) => {
            return Err(ConstraintError::invalid(whole, format!("unknown operator \"{other}\"")));
        }
    };
    let operand = caps.get(2).map_or("", |m| m.as_str());
    let mut version = parse_version(operand, whole)?;
    // `<2.0` must exclude 2.0 pre-releases, `>=2.0` must include them.
    if matches!(op, Operator::Lt | Operator::Ge) && version.stability() == Some(Stability::Stable)
    {
        version = version.as_dev_lower_bound();
    }
    Ok(vec![Comparator::new(op, version)])
}

fn parse_tilde(operand: &str, whole: &str) -> Result<Vec<Comparator>, ConstraintError> {
    let caps = range_operand(operand, whole)?;
    let position = last_present(&caps, 4);
    let low = range_lower_bound(operand, &caps, whole)?;
    let parts = captured_parts(&caps, 4, whole)?;
    let high = bump(parts, position.saturating_sub(1).max(1), 1);
    Ok(vec![
        Comparator::new(Operator::Ge, low),
        Comparator::new(Operator::Lt, high),
    ])
}

fn parse_caret(operand: &str, whole: &str) -> Result<Vec<Comparator>, ConstraintError> {
    let caps = range_operand(operand, whole)?;
    let parts = captured_parts(&caps, 4, whole)?;
    let has = |index: usize| caps.get(index).is_some();
    // The first non-zero component is the one that may not change.
    let position = if parts[0] != 0 || !has(2) {
        1
    } else if parts[1] != 0 || !has(3) {
        2
    } else {
        3
    };
    let low = range_lower_bound(operand, &caps, whole)?;
    let high = bump(parts, position, 1);
    Ok(vec![
        Comparator::new(Operator::Ge, low),
        Comparator::new(Operator::Lt, high),
    ])
}

fn parse_hyphen_range(from: &str, to: &str, whole: &str) -> Result<Vec<Comparator>, ConstraintError> {
    let from_caps = range_operand(from, whole)?;
    let lower = range_lower_bound(from, &from_caps, whole)?;

    let to_caps = range_operand(to, whole)?;
    let has_modifier = to_caps.get(5).is_some_and(|m| !m.as_str().is_empty());
    let complete = to_caps.get(3).is_some();
    let upper = if complete || has_modifier {
        Comparator::new(Operator::Le, parse_version(to, whole)?)
    } else {
        let parts = captured_parts(&to_caps, 4, whole)?;
        let position = if to_caps.get(2).is_some() { 2 } else { 1 };
        Comparator::new(Operator::Lt, bump(parts, position, 1))
    };

    Ok(vec![Comparator::new(Operator::Ge, lower), upper])
}

fn range_operand<'a>(
    operand: &'a str,
    whole: &str,
) -> Result<regex::Captures<'a>, ConstraintError> {
    RANGE_OPERAND
        .captures(operand)
        .ok_or_else(|| ConstraintError::invalid(whole, format!("invalid range bound \"{operand}\"")))
}

/// Lower bound of a range: the operand itself, as `-dev` when it carries no modifier.
fn range_lower_bound(
    operand: &str,
    caps: &regex::Captures<'_>,
    whole: &str,
) -> Result<NormalizedVersion, ConstraintError> {
    let version = parse_version(operand, whole)?;
    let has_modifier = caps.get(5).is_some_and(|m| !m.as_str().is_empty());
    Ok(if has_modifier {
        version
    } else {
        version.as_dev_lower_bound()
    })
}

fn parse_version(operand: &str, whole: &str) -> Result<NormalizedVersion, ConstraintError> {
    NormalizedVersion::parse(operand).map_err(|e| ConstraintError::invalid(whole, e.to_string()))
}

fn captured_parts(
    caps: &regex::Captures<'_>,
    groups: usize,
    whole: &str,
) -> Result<[u64; 4], ConstraintError> {
    let mut parts = [0u64; 4];
    for (index, part) in parts.iter_mut().enumerate().take(groups) {
        if let Some(m) = caps.get(index + 1) {
            *part = m
                .as_str()
                .parse()
                .map_err(|_| ConstraintError::invalid(whole, "numeric component out of range"))?;
        }
    }
    Ok(parts)
}

/// 1-based index of the last numeric group that matched.
fn last_present(caps: &regex::Captures<'_>, groups: usize) -> usize {
    (1..=groups)
        .rev()
        .find(|&index| caps.get(index).is_some())
        .unwrap_or(1)
}

/// Zeroes every component after `position` and adds `increment` at it,
/// returning the `-dev` flavour of the result.
fn bump(mut parts: [u64; 4], position: usize, increment: u64) -> NormalizedVersion {
    for (index, part) in parts.iter_mut().enumerate() {
        let slot = index + 1;
        if slot > position {
            *part = 0;
        } else if slot == position {
            *part = part.saturating_add(increment);
        }
    }
    NormalizedVersion::from_parts(parts).as_dev_lower_bound()
}

/// Drops `@stability` flags and `#reference` pins.
fn strip_flags(token: &str) -> &str {
    let token = token.split_once('#').map_or(token, |(head, _)| head);
    token.split_once('@').map_or(token, |(head, _)| head)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn satisfies(constraint: &str, version: &str) -> bool {
        VersionConstraint::parse(constraint)
            .unwrap()
            .matches(&NormalizedVersion::parse(version).unwrap())
    }

    #[test]
    fn test_tilde_minor_range() {
        let constraint = VersionConstraint::parse("~3.4").unwrap();
        assert_eq!(constraint.describe(), "[>= 3.4.0.0-dev < 4.0.0.0-dev]");
        assert!(satisfies("~3.4", "3.4.0"));
        assert!(satisfies("~3.4", "v3.9.12"));
        assert!(satisfies("~3.4", "3.4.x-dev"));
        assert!(!satisfies("~3.4", "4.0.0"));
        assert!(!satisfies("~3.4", "4.0.0-BETA2"));
        assert!(!satisfies("~3.4", "3.3.9"));
    }

    #[test]
    fn test_tilde_patch_range() {
        let constraint = VersionConstraint::parse("~3.4.1").unwrap();
        assert_eq!(constraint.describe(), "[>= 3.4.1.0-dev < 3.5.0.0-dev]");
        assert!(satisfies("~3.4.1", "3.4.7"));
        assert!(!satisfies("~3.4.1", "3.5.0"));
    }

    #[test]
    fn test_tilde_rejects_ruby_style_operator() {
        let err = VersionConstraint::parse("~>3.4").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("not supported"), "Expected rejection in: {msg}");
    }

    #[test]
    fn test_caret_ranges() {
        assert_eq!(
            VersionConstraint::parse("^1.2.3").unwrap().describe(),
            "[>= 1.2.3.0-dev < 2.0.0.0-dev]"
        );
        assert_eq!(
            VersionConstraint::parse("^0.3").unwrap().describe(),
            "[>= 0.3.0.0-dev < 0.4.0.0-dev]"
        );
        assert_eq!(
            VersionConstraint::parse("^0.0.3").unwrap().describe(),
            "[>= 0.0.3.0-dev < 0.0.4.0-dev]"
        );
        assert!(satisfies("^2.1", "2.8.0"));
        assert!(!satisfies("^2.1", "3.0.0"));
    }

    #[test]
    fn test_wildcards() {
        assert_eq!(
            VersionConstraint::parse("3.4.*").unwrap().describe(),
            "[>= 3.4.0.0-dev < 3.5.0.0-dev]"
        );
        assert_eq!(
            VersionConstraint::parse("0.*").unwrap().describe(),
            "[< 1.0.0.0-dev]"
        );
        assert!(satisfies("*", "dev-master"));
        assert!(satisfies("*", "1.0.0"));
    }

    #[test]
    fn test_hyphen_ranges() {
        assert_eq!(
            VersionConstraint::parse("1.0 - 2.0").unwrap().describe(),
            "[>= 1.0.0.0-dev < 2.1.0.0-dev]"
        );
        assert_eq!(
            VersionConstraint::parse("1.0.0 - 2.1.3").unwrap().describe(),
            "[>= 1.0.0.0-dev <= 2.1.3.0]"
        );
    }

    #[test]
    fn test_operators_and_conjunctions() {
        assert!(satisfies(">=3.4 <4.0", "3.4.0"));
        assert!(satisfies(">= 3.4, < 4.0", "3.9.0"));
        assert!(!satisfies(">=3.4 <4.0", "4.0.0-RC1"));
        assert!(satisfies("!=3.4.2", "3.4.3"));
        assert!(!satisfies("!=3.4.2", "3.4.2"));
        assert!(satisfies("3.4.2", "v3.4.2"));
        assert!(satisfies(">3.4", "3.4.1"));
        assert!(satisfies("<=3.4", "3.4.0"));
    }

    #[test]
    fn test_disjunctions() {
        assert!(satisfies("^2.0 || ^3.0", "3.1.0"));
        assert!(satisfies("^2.0 | ^3.0", "2.1.0"));
        assert!(!satisfies("^2.0 || ^3.0", "4.0.0"));
    }

    #[test]
    fn test_named_branches_only_match_equality() {
        assert!(satisfies("dev-master", "dev-master"));
        assert!(!satisfies("dev-master", "dev-main"));
        assert!(!satisfies(">=1.0", "dev-feature"));
        assert!(satisfies("!=1.0", "dev-feature"));
    }

    #[test]
    fn test_stability_flags_ignored() {
        assert!(satisfies("^3.0@dev", "3.1.0"));
        assert!(satisfies("dev-master#abc123", "dev-master"));
    }

    #[test]
    fn test_display_keeps_original_expression() {
        let constraint: VersionConstraint = "  ~3.4 ".parse().unwrap();
        assert_eq!(constraint.to_string(), "~3.4");
        assert_eq!(constraint.as_str(), "~3.4");
    }

    #[test]
    fn test_malformed_expressions() {
        assert_eq!(VersionConstraint::parse("   "), Err(ConstraintError::Empty));
        assert!(VersionConstraint::parse("foo bar").is_err());
        assert!(VersionConstraint::parse("^3.0 ||").is_err());
        assert!(VersionConstraint::parse("~abc").is_err());
    }
}
