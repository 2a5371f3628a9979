//! Dependency closure walker.
//!
//! Drives the recursive fetch of each requested module and its dependency
//! set through a [`PackageProvider`].
//!
//! # Scheduling
//!
//! - Top-level requests run concurrently, at most `fan_out` at a time, and
//!   complete in any order
//! - Within one module, dependencies are fetched strictly one after another,
//!   in manifest-declared order
//!
//! # De-duplication
//!
//! Each top-level request materializes its own closure in its own directory,
//! so a module is fetched at most once per request directory. Two requests
//! for different versions of the same module, or whose dependencies need
//! incompatible versions of a shared module, each get their own copy.
//! Requests that map to the same directory are fetched once; the report
//! counts them as one request.
//!
//! # Failure accounting
//!
//! Every per-module failure becomes a `failed to clone <name>: <reason>`
//! error status plus one count against the lineage of the top-level request
//! it belongs to. Siblings keep going. The walk as a whole has failed only
//! when every top-level request failed (see [`WalkReport::all_failed`]).
//!
//! # Cancellation
//!
//! The walk checks the shared cancellation token at the start of every
//! module fetch and before every dependency step. In-flight requests finish;
//! nothing new starts.

mod state;

pub use state::{ClosureState, VisitKey, VisitPhase, WalkReport};

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::events::EventSink;
use crate::package::{
    is_source_control, request_dir_name, unescape_name, FetchRequest, VersionConstraint,
};
use crate::provider::{PackageProvider, ProviderError};
use crate::storage::{BoxFuture, Storage};

/// Default number of top-level requests processed concurrently.
pub const DEFAULT_FAN_OUT: usize = 8;

/// Which modules get their auxiliary artifact fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuxiliaryPolicy {
    /// Every module in the closure.
    #[default]
    AllModules,
    /// Only the top-level requests.
    TopLevelOnly,
}

impl AuxiliaryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuxiliaryPolicy::AllModules => "all",
            AuxiliaryPolicy::TopLevelOnly => "top-level",
        }
    }
}

impl fmt::Display for AuxiliaryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuxiliaryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "all-modules" => Ok(AuxiliaryPolicy::AllModules),
            "top-level" | "toplevel" | "top" => Ok(AuxiliaryPolicy::TopLevelOnly),
            other => Err(format!(
                "invalid auxiliary policy '{}' (expected 'all' or 'top-level')",
                other
            )),
        }
    }
}

/// What a walk includes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkOptions {
    pub include_dependencies: bool,
    /// Dev dependencies are only expanded for top-level modules.
    pub include_dev_dependencies: bool,
    pub include_auxiliary_artifacts: bool,
    pub auxiliary_policy: AuxiliaryPolicy,
    pub fan_out: usize,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            include_dependencies: true,
            include_dev_dependencies: false,
            include_auxiliary_artifacts: false,
            auxiliary_policy: AuxiliaryPolicy::default(),
            fan_out: DEFAULT_FAN_OUT,
        }
    }
}

/// One module visit.
struct Visit<'a> {
    name: &'a str,
    /// Request directory name, the de-duplication scope.
    scope: &'a str,
    constraint: VersionConstraint,
    destination: &'a Path,
    lineage: usize,
    depth: usize,
}

/// How a visit ended, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitOutcome {
    Fetched,
    AlreadyVisited,
    Failed,
    Cancelled,
}

/// Walks the dependency closure of a set of requests.
pub struct ClosureWalker {
    provider: Arc<dyn PackageProvider>,
    storage: Arc<dyn Storage>,
    events: EventSink,
    options: WalkOptions,
}

impl ClosureWalker {
    pub fn new(
        provider: Arc<dyn PackageProvider>,
        storage: Arc<dyn Storage>,
        events: EventSink,
        options: WalkOptions,
    ) -> Self {
        Self {
            provider,
            storage,
            events,
            options,
        }
    }

    /// Fetch every request and its closure under `root`.
    ///
    /// Each top-level request gets its own directory under `root`, named
    /// after the request. Never fails as a whole; inspect the report.
    pub async fn walk(&self, root: &Path, requests: &[FetchRequest]) -> WalkReport {
        let requests = self.unique_requests(requests);
        let state = ClosureState::new(requests.len(), self.events.cancellation_token().clone());
        info!(
            provider = self.provider.name(),
            requests = requests.len(),
            fan_out = self.options.fan_out,
            "Starting closure walk"
        );

        let shared = &state;
        let top_level: Vec<BoxFuture<'_, ()>> = requests
            .iter()
            .enumerate()
            .map(move |(lineage, &request)| {
                Box::pin(self.walk_top_level(root, lineage, request, shared)) as BoxFuture<'_, ()>
            })
            .collect();
        stream::iter(top_level)
            .buffer_unordered(self.options.fan_out.max(1))
            .collect::<Vec<()>>()
            .await;

        let report = state.into_report();
        info!(
            requested = report.requested,
            failed = report.failed_top_level,
            visited = report.phases.len(),
            cancelled = report.cancelled,
            "Closure walk finished"
        );
        report
    }

    async fn walk_top_level(
        &self,
        root: &Path,
        lineage: usize,
        request: &FetchRequest,
        state: &ClosureState,
    ) {
        if state.is_cancelled() {
            return;
        }

        let directory = request_dir_name(&request.name, request.version_constraint.as_deref());
        let destination = root.join(&directory);
        if let Err(e) = self.storage.mkdir(&destination).await {
            self.report_failure(&request.name, &e.to_string(), lineage, state);
            state.record_top_level_failure(lineage);
            return;
        }

        let constraint = match VersionConstraint::from_optional(request.version_constraint.as_deref())
        {
            Ok(constraint) => constraint,
            Err(e) => {
                self.report_failure(&request.name, &e.to_string(), lineage, state);
                state.record_top_level_failure(lineage);
                return;
            }
        };

        let visit = Visit {
            name: &request.name,
            scope: &directory,
            constraint,
            destination: &destination,
            lineage,
            depth: 0,
        };
        if self.fetch(visit, state).await == VisitOutcome::Failed {
            state.record_top_level_failure(lineage);
        }
    }

    /// Drop requests that map to the directory of an earlier request.
    fn unique_requests<'r>(&self, requests: &'r [FetchRequest]) -> Vec<&'r FetchRequest> {
        let mut seen = HashSet::new();
        requests
            .iter()
            .filter(|request| {
                let fresh = seen.insert(request_dir_name(
                    &request.name,
                    request.version_constraint.as_deref(),
                ));
                if !fresh {
                    self.events.info(format!("{} already requested", request));
                }
                fresh
            })
            .collect()
    }

    /// Fetch one module and, recursively, its dependencies.
    fn fetch<'a>(&'a self, visit: Visit<'a>, state: &'a ClosureState) -> BoxFuture<'a, VisitOutcome> {
        Box::pin(async move {
            if state.is_cancelled() {
                return VisitOutcome::Cancelled;
            }

            let escaped = self.provider.escape_name(visit.name);
            let key = VisitKey::new(visit.scope, escaped.as_str());
            if !state.try_visit(&key) {
                debug!(module = visit.name, directory = visit.scope, "Already visited, skipping");
                return VisitOutcome::AlreadyVisited;
            }

            match self.fetch_claimed(&visit, &escaped, &key, state).await {
                Ok(outcome) => {
                    state.set_phase(&key, VisitPhase::Done);
                    outcome
                }
                Err(e) => {
                    state.set_phase(&key, VisitPhase::Failed);
                    self.report_failure(visit.name, &e.to_string(), visit.lineage, state);
                    VisitOutcome::Failed
                }
            }
        })
    }

    async fn fetch_claimed(
        &self,
        visit: &Visit<'_>,
        escaped: &str,
        key: &VisitKey,
        state: &ClosureState,
    ) -> Result<VisitOutcome, ProviderError> {
        let provider = &self.provider;

        state.set_phase(key, VisitPhase::Resolving);
        let version = provider.resolve_version(escaped, &visit.constraint).await?;

        state.set_phase(key, VisitPhase::Fetching);
        let module = provider
            .fetch_manifest_and_payload(escaped, &version, visit.destination)
            .await?;

        if self.wants_auxiliary(visit.depth) {
            self.fetch_auxiliary(escaped, &version, visit, state).await;
        }

        state.set_phase(key, VisitPhase::ReadingManifest);
        let manifest = provider.read_manifest(&module).await?;

        state.set_phase(key, VisitPhase::ExpandingDependencies);
        let mut dependencies = Vec::new();
        if self.options.include_dependencies {
            dependencies.extend(manifest.dependencies.iter());
        }
        if self.options.include_dev_dependencies && visit.depth == 0 {
            dependencies.extend(manifest.dev_dependencies.iter());
        }

        for dependency in dependencies {
            if state.is_cancelled() {
                return Ok(VisitOutcome::Cancelled);
            }

            if is_source_control(&dependency.constraint) {
                self.events.info(format!(
                    "skipping {}: source-control dependencies are not supported",
                    dependency.name
                ));
                continue;
            }

            let constraint = match VersionConstraint::parse(&dependency.constraint) {
                Ok(constraint) => constraint,
                Err(e) => {
                    self.report_failure(&dependency.name, &e.to_string(), visit.lineage, state);
                    continue;
                }
            };

            let dependency_escaped = provider.escape_name(&dependency.name);
            match provider
                .is_already_present(&dependency_escaped, &constraint, visit.destination)
                .await
            {
                Ok(true) => {
                    self.events
                        .info(format!("{} already exists", dependency.name));
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    self.report_failure(&dependency.name, &e.to_string(), visit.lineage, state);
                    continue;
                }
            }

            let child = Visit {
                name: &dependency.name,
                scope: visit.scope,
                constraint,
                destination: visit.destination,
                lineage: visit.lineage,
                depth: visit.depth + 1,
            };
            if self.fetch(child, state).await == VisitOutcome::Cancelled {
                return Ok(VisitOutcome::Cancelled);
            }
        }

        Ok(VisitOutcome::Fetched)
    }

    fn wants_auxiliary(&self, depth: usize) -> bool {
        self.options.include_auxiliary_artifacts
            && (depth == 0 || self.options.auxiliary_policy == AuxiliaryPolicy::AllModules)
    }

    /// Best-effort auxiliary fetch. Failures become warnings.
    async fn fetch_auxiliary(
        &self,
        escaped: &str,
        version: &str,
        visit: &Visit<'_>,
        state: &ClosureState,
    ) {
        if state.is_cancelled() {
            return;
        }

        // The companion counts as a visited module, so a later dependency on
        // it is not fetched twice and a companion never fetches its own
        let Some(auxiliary) = self.provider.auxiliary_name(escaped) else {
            return;
        };
        let key = VisitKey::new(visit.scope, auxiliary.as_str());
        if !state.try_visit(&key) {
            return;
        }

        state.set_phase(&key, VisitPhase::Fetching);
        match self
            .provider
            .fetch_auxiliary_artifact(escaped, version, visit.destination)
            .await
        {
            Ok(Some(_)) => state.set_phase(&key, VisitPhase::Done),
            Ok(None) => state.release(&key),
            Err(e) => {
                state.release(&key);
                warn!(module = %unescape_name(escaped), error = %e, "Auxiliary artifact unavailable");
                self.events.warning(format!(
                    "no {} for {}@{}: {}",
                    unescape_name(&auxiliary),
                    unescape_name(escaped),
                    version,
                    e
                ));
            }
        }
    }

    fn report_failure(&self, name: &str, reason: &str, lineage: usize, state: &ClosureState) {
        warn!(module = name, lineage, reason, "Module failed");
        state.record_failure(lineage);
        self.events
            .error(format!("failed to clone {}: {}", name, reason));
    }
}
