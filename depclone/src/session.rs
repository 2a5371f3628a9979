//! Closure fetch session: the caller-facing entry point.
//!
//! A [`FetchSession`] wires a provider, the closure walker and the archive
//! assembler to one storage backend and hands the caller an event stream:
//!
//! ```ignore
//! use depclone::{FetchRequest, FetchSession, MemoryStorage, ProgressEvent};
//!
//! let session = FetchSession::builder()
//!     .ecosystem("npm")
//!     .storage(Arc::new(MemoryStorage::new()))
//!     .build()?;
//!
//! let (mut events, cancel) = session.start_closure_fetch(vec![FetchRequest::new("left-pad")]);
//! while let Some(event) = events.recv().await {
//!     if let ProgressEvent::Complete { stream, .. } = event {
//!         stream.write_to(&mut file).await?;
//!     }
//! }
//! ```
//!
//! # Outcome
//!
//! The stream ends after exactly one of:
//!
//! - `Complete`: at least one top-level request succeeded and the archive
//!   is ready
//! - `FatalError`: unsupported ecosystem, no requests, every top-level request
//!   failed, or the archive could not be assembled
//! - nothing: the walk was cancelled

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::archive::{ArchiveAssembler, ArchiveError};
use crate::events::{self, CancelHandle, EventSink, EventStream, DEFAULT_PROGRESS_THRESHOLD};
use crate::package::FetchRequest;
use crate::provider::{
    AsyncHttpClient, ClientConfig, Ecosystem, ProviderError, ProviderFactory, ReqwestClient,
    UnsupportedEcosystem,
};
use crate::storage::{MemoryStorage, Storage, StorageError};
use crate::walker::{ClosureWalker, WalkOptions, WalkReport};

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Conditions that end a session without an archive.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    UnsupportedEcosystem(#[from] UnsupportedEcosystem),

    /// The HTTP client could not be constructed.
    #[error("failed to create registry client: {0}")]
    Client(#[source] ProviderError),

    #[error("no modules requested")]
    NoRequests,

    /// The fetch root could not be created.
    #[error("failed to prepare fetch root: {0}")]
    Storage(#[from] StorageError),

    /// Every top-level request failed.
    #[error("failed to download packages")]
    AllFailed(WalkReport),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// A configured closure fetch.
///
/// Cheap to clone; every call to [`FetchSession::start_closure_fetch`] runs
/// an independent walk with its own visited set.
#[derive(Clone)]
pub struct FetchSession {
    ecosystem: String,
    storage: Arc<dyn Storage>,
    root: PathBuf,
    options: WalkOptions,
    factory: ProviderFactory,
    progress_threshold: u64,
}

impl FetchSession {
    pub fn builder() -> FetchSessionBuilder {
        FetchSessionBuilder::default()
    }

    pub fn options(&self) -> &WalkOptions {
        &self.options
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start fetching `requests` in the background.
    ///
    /// Must be called from within a Tokio runtime. Dropping the returned
    /// stream cancels the walk, as does [`CancelHandle::cancel`].
    pub fn start_closure_fetch(&self, requests: Vec<FetchRequest>) -> (EventStream, CancelHandle) {
        let token = CancellationToken::new();
        let (sink, stream) = events::channel(token.clone());
        let session = self.clone();

        tokio::spawn(async move {
            match session.run(&sink, &requests).await {
                Ok(total_size) => {
                    info!(total_size, "Closure fetch complete");
                }
                Err(SessionError::Archive(e)) => {
                    // Already reported by the assembler
                    warn!(error = %e, "Archive assembly failed");
                }
                Err(e) => {
                    warn!(error = %e, "Closure fetch failed");
                    sink.fatal(e.to_string());
                }
            }
        });

        (stream, CancelHandle::new(token))
    }

    /// Walk and pack. Returns the archive's total file size, or `0` when the
    /// walk was cancelled and nothing was packed.
    async fn run(&self, sink: &EventSink, requests: &[FetchRequest]) -> SessionResult<u64> {
        let ecosystem: Ecosystem = self.ecosystem.parse()?;
        if requests.is_empty() {
            return Err(SessionError::NoRequests);
        }

        self.storage.mkdir(&self.root).await?;
        let provider = self.factory.create(
            ecosystem,
            Arc::clone(&self.storage),
            sink.clone(),
            self.progress_threshold,
        );
        let walker = ClosureWalker::new(
            provider,
            Arc::clone(&self.storage),
            sink.clone(),
            self.options.clone(),
        );

        let report = walker.walk(&self.root, requests).await;
        if report.cancelled {
            info!("Closure fetch cancelled, skipping archive");
            return Ok(0);
        }
        if report.all_failed() {
            return Err(SessionError::AllFailed(report));
        }

        let assembler = ArchiveAssembler::new(Arc::clone(&self.storage));
        Ok(assembler.assemble(&self.root, sink).await?)
    }
}

/// Builder for [`FetchSession`].
#[derive(Default)]
pub struct FetchSessionBuilder {
    ecosystem: Option<String>,
    storage: Option<Arc<dyn Storage>>,
    root: Option<PathBuf>,
    options: Option<WalkOptions>,
    client_config: Option<ClientConfig>,
    http_client: Option<Arc<dyn AsyncHttpClient>>,
    progress_threshold: Option<u64>,
}

impl FetchSessionBuilder {
    /// Ecosystem name (`npm`, `pypi`). Validated when a fetch starts, so an
    /// unknown name surfaces as a `FatalError` event. Defaults to `npm`.
    pub fn ecosystem(mut self, ecosystem: impl Into<String>) -> Self {
        self.ecosystem = Some(ecosystem.into());
        self
    }

    /// Storage backend. Defaults to a fresh [`MemoryStorage`].
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Fetch root inside the storage backend. Defaults to `/`.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn options(mut self, options: WalkOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = Some(config);
        self
    }

    /// HTTP client to use instead of building a [`ReqwestClient`].
    pub fn http_client(mut self, client: Arc<dyn AsyncHttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn progress_threshold(mut self, bytes: u64) -> Self {
        self.progress_threshold = Some(bytes);
        self
    }

    pub fn build(self) -> SessionResult<FetchSession> {
        let config = self.client_config.unwrap_or_default();
        let client: Arc<dyn AsyncHttpClient> = match self.http_client {
            Some(client) => client,
            None => Arc::new(ReqwestClient::new(&config).map_err(SessionError::Client)?),
        };

        Ok(FetchSession {
            ecosystem: self
                .ecosystem
                .unwrap_or_else(|| Ecosystem::default().to_string()),
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
            root: self.root.unwrap_or_else(|| PathBuf::from("/")),
            options: self.options.unwrap_or_default(),
            factory: ProviderFactory::new(client, config),
            progress_threshold: self
                .progress_threshold
                .unwrap_or(DEFAULT_PROGRESS_THRESHOLD),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProgressEvent;
    use crate::provider::MockAsyncHttpClient;

    fn session(ecosystem: &str) -> FetchSession {
        FetchSession::builder()
            .ecosystem(ecosystem)
            .http_client(Arc::new(MockAsyncHttpClient::new()))
            .build()
            .unwrap()
    }

    async fn collect(mut stream: EventStream) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = stream.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_builder_defaults() {
        let session = session("npm");
        assert_eq!(session.root(), Path::new("/"));
        assert_eq!(session.options(), &WalkOptions::default());
        assert_eq!(session.progress_threshold, DEFAULT_PROGRESS_THRESHOLD);
        assert_eq!(session.storage.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_unsupported_ecosystem_is_fatal() {
        let (stream, _cancel) = session("cargo").start_closure_fetch(vec![FetchRequest::new("x")]);
        let events = collect(stream).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            ProgressEvent::FatalError { message } => assert!(message.contains("cargo")),
            other => panic!("expected FatalError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_request_list_is_fatal() {
        let (stream, _cancel) = session("npm").start_closure_fetch(Vec::new());
        let events = collect(stream).await;
        assert!(matches!(
            events.as_slice(),
            [ProgressEvent::FatalError { message }] if message == "no modules requested"
        ));
    }

    #[tokio::test]
    async fn test_all_failed_yields_single_fatal_after_errors() {
        let (stream, _cancel) =
            session("npm").start_closure_fetch(vec![FetchRequest::new("nope")]);
        let events = collect(stream).await;

        let last = events.last().unwrap();
        assert!(matches!(
            last,
            ProgressEvent::FatalError { message } if message == "failed to download packages"
        ));
        assert!(!events.iter().any(|e| matches!(e, ProgressEvent::Complete { .. })));
        assert!(events
            .iter()
            .any(|e| e.as_status().is_some_and(|(m, _)| m.starts_with("failed to clone nope"))));
    }
}
