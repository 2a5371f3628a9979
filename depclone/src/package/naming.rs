//! Centralized naming conventions for the fetch root.
//!
//! This module is the single source of truth for how module names become
//! storage and network identifiers:
//! - Escaped names (e.g., `@babel%2fcore`)
//! - Top-level request folders (e.g., `@babel-core-7.24.0`)
//! - Manifest snapshots (e.g., `packages/@babel%2fcore-7.24.0.json`)
//! - Payload archives (e.g., `@babel%2fcore-7.24.0.tgz`)
//!
//! All other modules should use these functions rather than constructing names directly.

use semver::Version;

/// Folder holding raw manifest snapshots inside each request directory.
pub const PACKAGES_DIR: &str = "packages";

/// Extension of manifest snapshot files.
pub const MANIFEST_EXTENSION: &str = "json";

/// Extension of npm payload archives.
pub const PAYLOAD_EXTENSION: &str = "tgz";

/// Escape sequence used in place of `/` in module names.
const ESCAPED_SLASH: &str = "%2f";

/// Scope under which DefinitelyTyped companions are published.
const TYPES_SCOPE: &str = "@types";

/// Escape a module name for use in URLs and storage identifiers.
///
/// # Examples
///
/// ```
/// use depclone::package::escape_name;
///
/// assert_eq!(escape_name("left-pad"), "left-pad");
/// assert_eq!(escape_name("@babel/core"), "@babel%2fcore");
/// ```
pub fn escape_name(name: &str) -> String {
    name.replace('/', ESCAPED_SLASH)
}

/// Reverse [`escape_name`] for user-facing messages.
///
/// # Examples
///
/// ```
/// use depclone::package::unescape_name;
///
/// assert_eq!(unescape_name("@babel%2fcore"), "@babel/core");
/// assert_eq!(unescape_name("@babel%2Fcore"), "@babel/core");
/// ```
pub fn unescape_name(escaped: &str) -> String {
    escaped.replace(ESCAPED_SLASH, "/").replace("%2F", "/")
}

/// Folder name for one top-level request under the fetch root.
///
/// # Format
///
/// `{name with '/' replaced by '-'}[-{version}]`
///
/// # Examples
///
/// ```
/// use depclone::package::request_dir_name;
///
/// assert_eq!(request_dir_name("left-pad", None), "left-pad");
/// assert_eq!(request_dir_name("@babel/core", Some("7.24.0")), "@babel-core-7.24.0");
/// ```
pub fn request_dir_name(name: &str, version: Option<&str>) -> String {
    let base = sanitize_segment(name);
    match version.map(str::trim).filter(|v| !v.is_empty()) {
        Some(version) => format!("{}-{}", base, sanitize_segment(version)),
        None => base,
    }
}

/// Manifest snapshot filename for an escaped module name.
pub fn manifest_file_name(escaped: &str, version: &str) -> String {
    format!("{}-{}.{}", escaped, version, MANIFEST_EXTENSION)
}

/// Payload archive filename for an escaped module name.
pub fn payload_file_name(escaped: &str, version: &str) -> String {
    format!("{}-{}.{}", escaped, version, PAYLOAD_EXTENSION)
}

/// Split `{name}-{version}.{extension}` back into its parts.
///
/// Module names may themselves contain `-`, and versions may carry a
/// prerelease suffix, so the split point is the first `-` whose remainder
/// parses as a semantic version.
///
/// # Examples
///
/// ```
/// use depclone::package::split_versioned_file_name;
///
/// assert_eq!(
///     split_versioned_file_name("left-pad-1.3.0.tgz", "tgz"),
///     Some(("left-pad", "1.3.0"))
/// );
/// assert_eq!(
///     split_versioned_file_name("react-dom-19.0.0-rc.1.tgz", "tgz"),
///     Some(("react-dom", "19.0.0-rc.1"))
/// );
/// assert_eq!(split_versioned_file_name("README.md", "tgz"), None);
/// ```
pub fn split_versioned_file_name<'a>(
    file_name: &'a str,
    extension: &str,
) -> Option<(&'a str, &'a str)> {
    let stem = file_name
        .strip_suffix(extension)
        .and_then(|s| s.strip_suffix('.'))?;

    stem.match_indices('-')
        .map(|(idx, _)| (&stem[..idx], &stem[idx + 1..]))
        .find(|(name, version)| !name.is_empty() && Version::parse(version).is_ok())
}

/// Name of the DefinitelyTyped companion for an escaped module name.
///
/// Returns `None` when the module is itself under `@types`, which keeps the
/// companion lookup from recursing into `@types/@types/...`.
///
/// # Examples
///
/// ```
/// use depclone::package::types_companion_name;
///
/// assert_eq!(types_companion_name("lodash").as_deref(), Some("@types%2flodash"));
/// assert_eq!(
///     types_companion_name("@babel%2fcore").as_deref(),
///     Some("@types%2fbabel__core")
/// );
/// assert_eq!(types_companion_name("@types%2fnode"), None);
/// ```
pub fn types_companion_name(escaped: &str) -> Option<String> {
    let name = unescape_name(escaped);
    if is_types_companion(&name) {
        return None;
    }

    let flattened = match name.strip_prefix('@') {
        Some(scoped) => scoped.replacen('/', "__", 1),
        None => name,
    };
    Some(escape_name(&format!("{}/{}", TYPES_SCOPE, flattened)))
}

/// Returns true if the (escaped or plain) name is a DefinitelyTyped package.
pub fn is_types_companion(name: &str) -> bool {
    let name = unescape_name(name);
    name.strip_prefix(TYPES_SCOPE)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Replace path separators so a value is safe as a single path segment.
fn sanitize_segment(value: &str) -> String {
    value.replace(['/', '\\'], "-")
}
