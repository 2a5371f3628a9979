//! Version selection shared by every ecosystem.

use std::collections::HashMap;

use semver::Version;
use tracing::debug;

use super::types::{ProviderError, ProviderResult};
use crate::events::EventSink;
use crate::package::{parse_version, VersionConstraint};

/// Tag naming the registry's preferred release.
pub(crate) const LATEST_TAG: &str = "latest";

/// Published versions of one module plus its distribution tags.
#[derive(Debug, Clone, Default)]
pub(crate) struct VersionListing {
    /// Versions in the order the registry lists them.
    pub listed: Vec<String>,
    /// Tag name to version.
    pub tags: HashMap<String, String>,
}

impl VersionListing {
    /// Pick one version of `display_name` for `constraint`, reporting the
    /// choice on `events`.
    ///
    /// - Unconstrained: the `latest` tag, else the highest valid semantic
    ///   version (else the last listed) with a warning.
    /// - Tag: the tag's version.
    /// - Range: a listed version spelled exactly like the constraint, else the
    ///   newest listed version satisfying it.
    pub(crate) fn select(
        &self,
        display_name: &str,
        constraint: &VersionConstraint,
        events: &EventSink,
    ) -> ProviderResult<String> {
        if self.listed.is_empty() {
            return Err(ProviderError::NotFound {
                name: display_name.to_string(),
                reason: "module has no published versions".to_string(),
            });
        }

        if constraint.is_unconstrained() {
            if let Some(latest) = self.tagged(LATEST_TAG) {
                events.info(format!("using latest version {}", latest));
                return Ok(latest.to_string());
            }

            let fallback = self.highest().unwrap_or_else(|| self.last_listed());
            events.warning(format!(
                "{} has no latest tag, falling back to version {}",
                display_name, fallback
            ));
            return Ok(fallback);
        }

        let chosen = match constraint.tag() {
            Some(tag) => self.tagged(tag).map(str::to_string),
            None => self
                .exact_listed(constraint)
                .or_else(|| self.newest_matching(constraint)),
        };

        match chosen {
            Some(version) => {
                debug!(module = display_name, %constraint, version = %version, "Version resolved");
                events.info(format!(
                    "using version {} for module {}",
                    version, display_name
                ));
                Ok(version)
            }
            None => Err(ProviderError::NoMatchingVersion {
                name: display_name.to_string(),
                constraint: constraint.to_string(),
            }),
        }
    }

    /// Version behind `tag`, only if the registry actually lists it.
    fn tagged(&self, tag: &str) -> Option<&str> {
        self.tags
            .get(tag)
            .map(String::as_str)
            .filter(|version| self.listed.iter().any(|listed| listed == version))
    }

    fn highest(&self) -> Option<String> {
        self.parsed()
            .into_iter()
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, raw)| raw.to_string())
    }

    fn last_listed(&self) -> String {
        self.listed.last().cloned().unwrap_or_default()
    }

    fn exact_listed(&self, constraint: &VersionConstraint) -> Option<String> {
        let literal = constraint.literal()?;
        self.listed.iter().find(|listed| *listed == literal).cloned()
    }

    fn newest_matching(&self, constraint: &VersionConstraint) -> Option<String> {
        let mut candidates = self.parsed();
        candidates.sort_by(|(a, _), (b, _)| b.cmp(a));
        candidates
            .into_iter()
            .find(|(version, _)| constraint.matches(version))
            .map(|(_, raw)| raw.to_string())
    }

    fn parsed(&self) -> Vec<(Version, &str)> {
        self.listed
            .iter()
            .filter_map(|raw| parse_version(raw).map(|version| (version, raw.as_str())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::events::{channel, EventStream, ProgressEvent, Severity};

    fn listing(versions: &[&str], latest: Option<&str>) -> VersionListing {
        let mut tags = HashMap::new();
        if let Some(latest) = latest {
            tags.insert(LATEST_TAG.to_string(), latest.to_string());
        }
        VersionListing {
            listed: versions.iter().map(|v| v.to_string()).collect(),
            tags,
        }
    }

    fn statuses(stream: &mut EventStream) -> Vec<(String, Severity)> {
        let mut out = Vec::new();
        while let Some(Some(event)) = futures::FutureExt::now_or_never(stream.recv()) {
            if let ProgressEvent::Status { message, severity } = event {
                out.push((message, severity));
            }
        }
        out
    }

    #[test]
    fn test_unconstrained_prefers_latest_tag() {
        let (sink, mut stream) = channel(CancellationToken::new());
        let listing = listing(&["1.0.0", "1.3.0", "2.0.0-beta.1"], Some("1.3.0"));

        let version = listing
            .select("left-pad", &VersionConstraint::any(), &sink)
            .unwrap();

        assert_eq!(version, "1.3.0");
        assert_eq!(
            statuses(&mut stream),
            vec![("using latest version 1.3.0".to_string(), Severity::Info)]
        );
    }

    #[test]
    fn test_unconstrained_without_tag_warns_and_takes_highest() {
        let (sink, mut stream) = channel(CancellationToken::new());
        let listing = listing(&["1.0.0", "1.10.0", "1.9.0"], None);

        let version = listing
            .select("pkg", &VersionConstraint::any(), &sink)
            .unwrap();

        assert_eq!(version, "1.10.0");
        let events = statuses(&mut stream);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, Severity::Warning);
    }

    #[test]
    fn test_unconstrained_without_semver_takes_last_listed() {
        let (sink, _stream) = channel(CancellationToken::new());
        let listing = listing(&["alpha", "beta"], None);
        let version = listing
            .select("odd", &VersionConstraint::any(), &sink)
            .unwrap();
        assert_eq!(version, "beta");
    }

    #[test]
    fn test_range_picks_newest_match() {
        let (sink, mut stream) = channel(CancellationToken::new());
        let listing = listing(&["1.0.0", "1.2.0", "1.4.1", "2.0.0"], Some("2.0.0"));
        let constraint = VersionConstraint::parse("^1.2.0").unwrap();

        let version = listing.select("pkg", &constraint, &sink).unwrap();

        assert_eq!(version, "1.4.1");
        assert_eq!(
            statuses(&mut stream),
            vec![("using version 1.4.1 for module pkg".to_string(), Severity::Info)]
        );
    }

    #[test]
    fn test_non_semver_release_by_exact_text() {
        let (sink, _stream) = channel(CancellationToken::new());
        let listing = listing(&["4.1", "4.2", "4.2.1", "1.0.post1", "2.0rc1"], Some("4.2.1"));

        for (raw, expected) in [("4.2", "4.2"), ("1.0.post1", "1.0.post1"), ("==2.0rc1", "2.0rc1")] {
            let constraint = VersionConstraint::parse(raw).unwrap();
            assert_eq!(listing.select("django", &constraint, &sink).unwrap(), expected);
        }

        let missing = VersionConstraint::parse("3.0.post9").unwrap();
        assert!(listing.select("django", &missing, &sink).unwrap_err().is_not_found());
    }

    #[test]
    fn test_tag_constraint() {
        let (sink, _stream) = channel(CancellationToken::new());
        let mut listing = listing(&["1.0.0", "2.0.0-rc.1"], Some("1.0.0"));
        listing
            .tags
            .insert("next".to_string(), "2.0.0-rc.1".to_string());

        let constraint = VersionConstraint::parse("next").unwrap();
        assert_eq!(listing.select("pkg", &constraint, &sink).unwrap(), "2.0.0-rc.1");
    }

    #[test]
    fn test_no_match_is_not_found() {
        let (sink, _stream) = channel(CancellationToken::new());
        let listing = listing(&["1.0.0"], Some("1.0.0"));
        let constraint = VersionConstraint::parse(">=5").unwrap();

        let err = listing.select("pkg", &constraint, &sink).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_unpublished_is_not_found() {
        let (sink, _stream) = channel(CancellationToken::new());
        let err = VersionListing::default()
            .select("gone", &VersionConstraint::any(), &sink)
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }
}
