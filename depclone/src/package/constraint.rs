//! Version constraint parsing and matching.
//!
//! Registries describe dependencies with npm-style range strings
//! (`^1.2.0`, `1.x`, `>= 2.1 < 3`, `1.0.0 - 1.4.0 || ^2`). The `semver` crate
//! speaks Cargo's dialect, so [`VersionConstraint::parse`] rewrites each
//! alternative into a [`semver::VersionReq`] before matching:
//!
//! | npm                 | semver crate            |
//! |---------------------|-------------------------|
//! | `1.3.0`             | `=1.3.0`                |
//! | `1.2` / `1.2.x`     | `=1.2`                  |
//! | `>= 1.2 <2`         | `>=1.2, <2`             |
//! | `1.0.0 - 1.4`       | `>=1.0.0, <=1.4`        |
//! | `^1 \|\| ^2`        | two alternatives        |
//!
//! Empty, `*`, `x` and `latest` are unconstrained. Any other bare word
//! (`next`, `beta`) is treated as a distribution tag name. A bare version
//! that is not semver (`4.2`, `1.0.post1`, `2.0rc1`, as PyPI publishes them)
//! also matches a listed version with exactly that text.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use semver::{Version, VersionReq};
use thiserror::Error;

/// Matches dependency specs that point at source control or local paths.
static SOURCE_CONTROL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(git|git\+[a-z]+|http|https|ssh|github|gitlab|bitbucket|file):")
        .expect("static regex is valid")
});

/// Matches a bare distribution tag name.
static TAG_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9._-]*$").expect("static regex is valid"));

/// Matches a bare version literal in any ecosystem's spelling.
static VERSION_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9][0-9A-Za-z.+!_-]*$").expect("static regex is valid")
});

/// Errors raised while parsing a constraint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConstraintError {
    /// The constraint is a source-control URL.
    #[error("source-control constraint is not supported: {0}")]
    SourceControl(String),

    /// The constraint could not be understood.
    #[error("invalid version constraint '{raw}': {reason}")]
    Invalid { raw: String, reason: String },
}

/// Returns true if the dependency spec points at source control or a path.
///
/// # Examples
///
/// ```
/// use depclone::package::is_source_control;
///
/// assert!(is_source_control("git+https://github.com/user/repo.git"));
/// assert!(is_source_control("https://example.com/pkg.tgz"));
/// assert!(!is_source_control("^1.2.0"));
/// ```
pub fn is_source_control(raw: &str) -> bool {
    SOURCE_CONTROL.is_match(raw.trim())
}

#[derive(Debug, Clone)]
enum ConstraintKind {
    Any,
    Tag(String),
    Range(Vec<VersionReq>),
    /// A version literal the semver crate cannot read.
    Exact(String),
}

/// A parsed version constraint.
#[derive(Debug, Clone)]
pub struct VersionConstraint {
    raw: String,
    kind: ConstraintKind,
}

impl VersionConstraint {
    /// The unconstrained request.
    pub fn any() -> Self {
        Self {
            raw: String::new(),
            kind: ConstraintKind::Any,
        }
    }

    /// Parse an optional constraint string; `None` is unconstrained.
    pub fn from_optional(raw: Option<&str>) -> Result<Self, ConstraintError> {
        match raw {
            Some(raw) => Self::parse(raw),
            None => Ok(Self::any()),
        }
    }

    /// Parse an npm-style constraint.
    pub fn parse(raw: &str) -> Result<Self, ConstraintError> {
        let trimmed = raw.trim();

        if is_source_control(trimmed) {
            return Err(ConstraintError::SourceControl(trimmed.to_string()));
        }

        let kind = match trimmed {
            "" | "*" | "x" | "X" | "latest" => ConstraintKind::Any,
            tag if TAG_NAME.is_match(tag) && !looks_like_version(tag) => {
                ConstraintKind::Tag(tag.to_string())
            }
            _ => {
                let alternatives = trimmed
                    .split("||")
                    .map(|alt| translate_alternative(alt.trim()))
                    .map(|translated| {
                        VersionReq::parse(&translated).map_err(|e| ConstraintError::Invalid {
                            raw: trimmed.to_string(),
                            reason: e.to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>();
                match (alternatives, version_literal(trimmed)) {
                    (Ok(alternatives), _) => ConstraintKind::Range(alternatives),
                    (Err(_), Some(literal)) => ConstraintKind::Exact(literal.to_string()),
                    (Err(e), None) => return Err(e),
                }
            }
        };

        Ok(Self {
            raw: trimmed.to_string(),
            kind,
        })
    }

    /// The constraint as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if any version is acceptable and the registry's preferred
    /// release should be used.
    pub fn is_unconstrained(&self) -> bool {
        matches!(self.kind, ConstraintKind::Any)
    }

    /// The distribution tag name, if this constraint names one.
    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            ConstraintKind::Tag(tag) => Some(tag),
            _ => None,
        }
    }

    /// The bare version this constraint names, as written without a leading
    /// `=` or `v`.
    ///
    /// Used to pick a listed version by exact text when it is not semver.
    pub fn literal(&self) -> Option<&str> {
        match &self.kind {
            ConstraintKind::Exact(literal) => Some(literal),
            ConstraintKind::Range(_) => version_literal(&self.raw),
            ConstraintKind::Any | ConstraintKind::Tag(_) => None,
        }
    }

    /// Returns true if `version` satisfies the constraint.
    ///
    /// Tags never match directly; they must be resolved against the
    /// registry's tag map first.
    pub fn matches(&self, version: &Version) -> bool {
        match &self.kind {
            ConstraintKind::Any => version.pre.is_empty(),
            ConstraintKind::Tag(_) | ConstraintKind::Exact(_) => false,
            ConstraintKind::Range(alternatives) => {
                alternatives.iter().any(|req| req.matches(version))
            }
        }
    }

    /// Parse `version` leniently and match it.
    ///
    /// Versions that are not valid semver only match their exact literal.
    pub fn matches_str(&self, version: &str) -> bool {
        parse_version(version).is_some_and(|v| self.matches(&v))
            || self.literal().is_some_and(|literal| literal == version.trim())
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            write!(f, "*")
        } else {
            write!(f, "{}", self.raw)
        }
    }
}

/// Parse a version string, tolerating a leading `v` or `=`.
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim().trim_start_matches('=').trim_start();
    let trimmed = trimmed
        .strip_prefix(['v', 'V'])
        .unwrap_or(trimmed);
    Version::parse(trimmed).ok()
}

/// The version literal in `raw`, without leading `=` or `v`.
fn version_literal(raw: &str) -> Option<&str> {
    let stripped = raw.trim().trim_start_matches('=').trim_start();
    let stripped = stripped.strip_prefix(['v', 'V']).unwrap_or(stripped);
    VERSION_LITERAL.is_match(stripped).then_some(stripped)
}

/// Rewrite one `||` alternative into semver crate syntax.
fn translate_alternative(alternative: &str) -> String {
    if let Some((low, high)) = alternative.split_once(" - ") {
        let low = normalize_version_text(low.trim());
        let high = normalize_version_text(high.trim());
        return match (low.is_empty(), high.is_empty()) {
            (true, true) => "*".to_string(),
            (true, false) => format!("<={}", high),
            (false, true) => format!(">={}", low),
            (false, false) => format!(">={}, <={}", low, high),
        };
    }

    let comparators: Vec<String> = join_detached_operators(alternative)
        .iter()
        .filter_map(|token| translate_comparator(token))
        .collect();

    if comparators.is_empty() {
        "*".to_string()
    } else {
        comparators.join(", ")
    }
}

/// Glue operators written with a trailing space (`>= 1.2`) to their operand.
fn join_detached_operators(alternative: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_operator: Option<String> = None;

    for token in alternative
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
    {
        let is_bare_operator = token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^'));
        if is_bare_operator {
            pending_operator = Some(token.to_string());
            continue;
        }
        match pending_operator.take() {
            Some(op) => tokens.push(format!("{}{}", op, token)),
            None => tokens.push(token.to_string()),
        }
    }
    tokens
}

/// Translate a single comparator token. Returns `None` for "match anything".
fn translate_comparator(token: &str) -> Option<String> {
    let split = token
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
        .unwrap_or(token.len());
    let (operator, operand) = token.split_at(split);
    let operator = match operator {
        "~>" => "~",
        other => other,
    };

    let version = normalize_version_text(operand);
    if version.is_empty() {
        return None;
    }

    // npm treats a bare full version as exact and a bare partial as a
    // wildcard; `=` with a partial version means the same thing to semver
    let operator = if operator.is_empty() { "=" } else { operator };
    Some(format!("{}{}", operator, version))
}

/// Strip `v` prefixes and wildcard components (`1.x.x` → `1`).
fn normalize_version_text(operand: &str) -> String {
    let operand = operand.strip_prefix(['v', 'V']).unwrap_or(operand);
    let core_end = operand.find(['-', '+']).unwrap_or(operand.len());
    let (core, suffix) = operand.split_at(core_end);

    let parts: Vec<&str> = core
        .split('.')
        .take_while(|part| !matches!(*part, "x" | "X" | "*" | ""))
        .collect();

    if parts.is_empty() {
        return String::new();
    }
    if parts.len() < 3 {
        // A suffix only makes sense on a full version
        return parts.join(".");
    }
    format!("{}{}", parts.join("."), suffix)
}

/// Returns true if a bare word reads as a version rather than a tag name.
fn looks_like_version(word: &str) -> bool {
    let rest = word.strip_prefix(['v', 'V']).unwrap_or(word);
    rest.starts_with(|c: char| c.is_ascii_digit())
        || rest.split('.').all(|part| matches!(part, "x" | "X" | "*"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_unconstrained_forms() {
        for raw in ["", "  ", "*", "x", "latest"] {
            let c = VersionConstraint::parse(raw).unwrap();
            assert!(c.is_unconstrained(), "{raw:?} should be unconstrained");
        }
        assert!(VersionConstraint::from_optional(None)
            .unwrap()
            .is_unconstrained());
    }

    #[test]
    fn test_tags() {
        let c = VersionConstraint::parse("next").unwrap();
        assert_eq!(c.tag(), Some("next"));
        assert!(!c.matches(&v("1.0.0")));
    }

    #[test]
    fn test_bare_full_version_is_exact() {
        let c = VersionConstraint::parse("1.3.0").unwrap();
        assert!(c.matches(&v("1.3.0")));
        assert!(!c.matches(&v("1.3.1")));
        assert!(!c.matches(&v("1.4.0")));
    }

    #[test]
    fn test_partial_versions_are_wildcards() {
        let c = VersionConstraint::parse("1.2").unwrap();
        assert!(c.matches(&v("1.2.0")));
        assert!(c.matches(&v("1.2.9")));
        assert!(!c.matches(&v("1.3.0")));

        let c = VersionConstraint::parse("1.x").unwrap();
        assert!(c.matches(&v("1.9.9")));
        assert!(!c.matches(&v("2.0.0")));
    }

    #[test]
    fn test_caret_and_tilde() {
        let caret = VersionConstraint::parse("^1.2.0").unwrap();
        assert!(caret.matches(&v("1.9.0")));
        assert!(!caret.matches(&v("2.0.0")));

        let tilde = VersionConstraint::parse("~1.2.0").unwrap();
        assert!(tilde.matches(&v("1.2.5")));
        assert!(!tilde.matches(&v("1.3.0")));
    }

    #[test]
    fn test_space_separated_comparators() {
        let c = VersionConstraint::parse(">= 1.2.0 <2").unwrap();
        assert!(c.matches(&v("1.2.0")));
        assert!(c.matches(&v("1.99.0")));
        assert!(!c.matches(&v("2.0.0")));
        assert!(!c.matches(&v("1.1.9")));
    }

    #[test]
    fn test_hyphen_range() {
        let c = VersionConstraint::parse("1.0.0 - 1.4").unwrap();
        assert!(c.matches(&v("1.0.0")));
        assert!(c.matches(&v("1.4.7")));
        assert!(!c.matches(&v("1.5.0")));
    }

    #[test]
    fn test_union() {
        let c = VersionConstraint::parse("^1.0.0 || ^3.0.0").unwrap();
        assert!(c.matches(&v("1.5.0")));
        assert!(!c.matches(&v("2.0.0")));
        assert!(c.matches(&v("3.1.0")));
    }

    #[test]
    fn test_prereleases_need_explicit_opt_in() {
        let c = VersionConstraint::parse("^1.0.0").unwrap();
        assert!(!c.matches(&v("1.1.0-beta.1")));

        let c = VersionConstraint::parse("1.1.0-beta.1").unwrap();
        assert!(c.matches(&v("1.1.0-beta.1")));
    }

    #[test]
    fn test_source_control_is_rejected() {
        let err = VersionConstraint::parse("git://github.com/a/b.git").unwrap_err();
        assert!(matches!(err, ConstraintError::SourceControl(_)));
        assert!(is_source_control("github:user/repo"));
        assert!(is_source_control("file:../local"));
    }

    #[test]
    fn test_matches_str_is_lenient() {
        let c = VersionConstraint::parse("^2.0.0").unwrap();
        assert!(c.matches_str("v2.1.0"));
        assert!(c.matches_str("=2.0.1"));
        assert!(!c.matches_str("not-a-version"));
    }

    #[test]
    fn test_non_semver_literals() {
        for raw in ["1.0.post1", "2.0rc1", "==4.2"] {
            let c = VersionConstraint::parse(raw).unwrap();
            assert!(!c.is_unconstrained());
            assert!(c.tag().is_none());
        }

        let c = VersionConstraint::parse("1.0.post1").unwrap();
        assert_eq!(c.literal(), Some("1.0.post1"));
        assert!(c.matches_str("1.0.post1"));
        assert!(!c.matches_str("1.0.post2"));

        assert_eq!(VersionConstraint::parse("==4.2").unwrap().literal(), Some("4.2"));

        // Partial semver keeps its wildcard meaning and also names the literal
        let c = VersionConstraint::parse("4.2").unwrap();
        assert_eq!(c.literal(), Some("4.2"));
        assert!(c.matches_str("4.2"));
        assert!(c.matches_str("4.2.1"));
        assert!(VersionConstraint::parse("^4.2").unwrap().literal().is_none());
    }

    #[test]
    fn test_invalid_constraint() {
        let err = VersionConstraint::parse(">=>=1").unwrap_err();
        assert!(matches!(err, ConstraintError::Invalid { .. }));
    }

    proptest! {
        #[test]
        fn prop_parse_never_panics(raw in "\\PC{0,24}") {
            let _ = VersionConstraint::parse(&raw);
        }

        #[test]
        fn prop_exact_version_matches_itself(major in 0u64..50, minor in 0u64..50, patch in 0u64..50) {
            let text = format!("{}.{}.{}", major, minor, patch);
            let c = VersionConstraint::parse(&text).unwrap();
            prop_assert!(c.matches(&Version::new(major, minor, patch)));
        }
    }
}
