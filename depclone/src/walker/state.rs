//! Per-walk state: visited set, module phases and failure accounting.
//!
//! A [`ClosureState`] is created by one walk invocation and consumed into a
//! [`WalkReport`] when the walk completes. Concurrent top-level branches
//! share it by reference, but visits are keyed by request directory: each
//! top-level request materializes its own closure, and only requests that
//! land in the same directory share visits.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Lifecycle of one module visit.
///
/// `Pending → Resolving → Fetching → ReadingManifest → ExpandingDependencies
/// → Done`, or `Failed` from any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisitPhase {
    Pending,
    Resolving,
    Fetching,
    ReadingManifest,
    ExpandingDependencies,
    Done,
    Failed,
}

impl VisitPhase {
    /// Returns true for `Done` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VisitPhase::Done | VisitPhase::Failed)
    }
}

impl fmt::Display for VisitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VisitPhase::Pending => "pending",
            VisitPhase::Resolving => "resolving",
            VisitPhase::Fetching => "fetching",
            VisitPhase::ReadingManifest => "reading manifest",
            VisitPhase::ExpandingDependencies => "expanding dependencies",
            VisitPhase::Done => "done",
            VisitPhase::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

/// A module within one request directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VisitKey {
    /// Request directory name under the fetch root.
    pub directory: String,
    /// Escaped module name.
    pub name: String,
}

impl VisitKey {
    pub fn new(directory: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for VisitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.directory, self.name)
    }
}

#[derive(Debug, Default)]
struct Inner {
    phases: HashMap<VisitKey, VisitPhase>,
    lineage_failures: Vec<usize>,
    failed_top_level: Vec<bool>,
}

/// Mutable state of one closure walk.
#[derive(Debug)]
pub struct ClosureState {
    inner: Mutex<Inner>,
    requested: usize,
    cancel: CancellationToken,
}

impl ClosureState {
    /// State for a walk over `requested` top-level modules.
    pub fn new(requested: usize, cancel: CancellationToken) -> Self {
        Self {
            inner: Mutex::new(Inner {
                phases: HashMap::new(),
                lineage_failures: vec![0; requested],
                failed_top_level: vec![false; requested],
            }),
            requested,
            cancel,
        }
    }

    /// Claim `key` for this walk.
    ///
    /// Returns false if the module was already visited or is in flight in
    /// the same request directory. The check and the insert happen under one
    /// lock.
    pub fn try_visit(&self, key: &VisitKey) -> bool {
        let mut inner = self.inner.lock();
        if inner.phases.contains_key(key) {
            return false;
        }
        inner.phases.insert(key.clone(), VisitPhase::Pending);
        true
    }

    /// Give up a claim so a later visit may try again.
    pub fn release(&self, key: &VisitKey) {
        self.inner.lock().phases.remove(key);
    }

    /// Move `key` to `phase`. Terminal phases are never left.
    pub fn set_phase(&self, key: &VisitKey, phase: VisitPhase) {
        let mut inner = self.inner.lock();
        if let Some(current) = inner.phases.get_mut(key) {
            if current.is_terminal() {
                return;
            }
            trace!(module = %key, from = %current, to = %phase, "Phase transition");
            *current = phase;
        }
    }

    pub fn phase(&self, key: &VisitKey) -> Option<VisitPhase> {
        self.inner.lock().phases.get(key).copied()
    }

    /// Count one failed module in the lineage of top-level request `lineage`.
    pub fn record_failure(&self, lineage: usize) {
        if let Some(count) = self.inner.lock().lineage_failures.get_mut(lineage) {
            *count += 1;
        }
    }

    /// Mark top-level request `lineage` itself as failed.
    pub fn record_top_level_failure(&self, lineage: usize) {
        if let Some(failed) = self.inner.lock().failed_top_level.get_mut(lineage) {
            *failed = true;
        }
    }

    /// Returns true once the cooperative cancellation flag is set.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    /// Finish the walk.
    pub fn into_report(self) -> WalkReport {
        let cancelled = self.cancel.is_cancelled();
        let inner = self.inner.into_inner();
        WalkReport {
            requested: self.requested,
            failed_top_level: inner.failed_top_level.iter().filter(|f| **f).count(),
            lineage_failures: inner.lineage_failures,
            phases: inner.phases.into_iter().collect(),
            cancelled,
        }
    }
}

/// Outcome of a closure walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkReport {
    /// Number of top-level requests.
    pub requested: usize,
    /// Number of top-level requests whose own fetch failed.
    pub failed_top_level: usize,
    /// Failed modules per top-level request, at any depth.
    pub lineage_failures: Vec<usize>,
    /// Final phase of every visited module.
    pub phases: BTreeMap<VisitKey, VisitPhase>,
    /// The walk was cancelled before it finished.
    pub cancelled: bool,
}

impl WalkReport {
    /// Returns true if every top-level request failed.
    ///
    /// An empty request list counts as failed.
    pub fn all_failed(&self) -> bool {
        self.failed_top_level == self.requested
    }

    /// Returns true if the walk finished and at least one top-level request
    /// succeeded.
    pub fn is_success(&self) -> bool {
        !self.cancelled && !self.all_failed()
    }

    /// Total number of failed modules across all lineages.
    pub fn total_failures(&self) -> usize {
        self.lineage_failures.iter().sum()
    }

    /// Final phase of escaped module `name` in request directory `directory`.
    pub fn phase(&self, directory: &str, name: &str) -> Option<VisitPhase> {
        self.phases.get(&VisitKey::new(directory, name)).copied()
    }

    /// Modules that reached `Done`.
    pub fn completed(&self) -> impl Iterator<Item = &VisitKey> {
        self.phases
            .iter()
            .filter(|(_, phase)| **phase == VisitPhase::Done)
            .map(|(key, _)| key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> VisitKey {
        VisitKey::new("app", name)
    }

    #[test]
    fn test_try_visit_is_once_per_name() {
        let state = ClosureState::new(1, CancellationToken::new());
        assert!(state.try_visit(&key("a")));
        assert!(!state.try_visit(&key("a")));
        assert!(state.try_visit(&key("b")));
        assert_eq!(state.phase(&key("a")), Some(VisitPhase::Pending));
    }

    #[test]
    fn test_try_visit_is_scoped_to_request_directory() {
        let state = ClosureState::new(2, CancellationToken::new());
        assert!(state.try_visit(&VisitKey::new("app", "shared")));
        assert!(state.try_visit(&VisitKey::new("tool", "shared")));
        assert!(!state.try_visit(&VisitKey::new("tool", "shared")));
        assert_eq!(VisitKey::new("tool", "shared").to_string(), "tool/shared");
    }

    #[test]
    fn test_release_allows_revisit() {
        let state = ClosureState::new(1, CancellationToken::new());
        assert!(state.try_visit(&key("a")));
        state.release(&key("a"));
        assert!(state.try_visit(&key("a")));
    }

    #[test]
    fn test_terminal_phase_is_sticky() {
        let state = ClosureState::new(1, CancellationToken::new());
        state.try_visit(&key("a"));
        state.set_phase(&key("a"), VisitPhase::Failed);
        state.set_phase(&key("a"), VisitPhase::Done);
        assert_eq!(state.phase(&key("a")), Some(VisitPhase::Failed));
    }

    #[test]
    fn test_set_phase_ignores_unknown_module() {
        let state = ClosureState::new(1, CancellationToken::new());
        state.set_phase(&key("ghost"), VisitPhase::Done);
        assert_eq!(state.phase(&key("ghost")), None);
    }

    #[test]
    fn test_report_counts() {
        let state = ClosureState::new(2, CancellationToken::new());
        state.try_visit(&key("a"));
        state.set_phase(&key("a"), VisitPhase::Done);
        state.record_failure(0);
        state.record_failure(0);
        state.record_failure(1);
        state.record_top_level_failure(1);
        state.record_failure(7);

        let report = state.into_report();
        assert_eq!(report.requested, 2);
        assert_eq!(report.failed_top_level, 1);
        assert_eq!(report.lineage_failures, vec![2, 1]);
        assert_eq!(report.total_failures(), 3);
        assert!(!report.all_failed());
        assert!(report.is_success());
        assert_eq!(report.completed().collect::<Vec<_>>(), vec![&key("a")]);
        assert_eq!(report.phase("app", "a"), Some(VisitPhase::Done));
    }

    #[test]
    fn test_all_failed() {
        let state = ClosureState::new(2, CancellationToken::new());
        state.record_top_level_failure(0);
        state.record_top_level_failure(1);
        state.record_top_level_failure(1);
        assert!(state.into_report().all_failed());

        assert!(ClosureState::new(0, CancellationToken::new())
            .into_report()
            .all_failed());
    }

    #[test]
    fn test_cancelled_report_is_not_success() {
        let token = CancellationToken::new();
        let state = ClosureState::new(1, token.clone());
        token.cancel();
        assert!(state.is_cancelled());

        let report = state.into_report();
        assert!(report.cancelled);
        assert!(!report.is_success());
    }
}
