//! Core provider types and traits.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use super::http::{AsyncHttpClient, ClientConfig};
use crate::events::EventSink;
use crate::package::{
    escape_name, ConstraintError, ManifestDescriptor, MaterializedModule, VersionConstraint,
};
use crate::storage::{BoxFuture, Storage, StorageError};

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors raised by package providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The module does not exist or has no published versions.
    #[error("{reason}")]
    NotFound { name: String, reason: String },

    /// No published version satisfies the constraint.
    #[error("no version of {name} satisfies '{constraint}'")]
    NoMatchingVersion { name: String, constraint: String },

    /// Transport-level failure.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// The registry answered with something we cannot interpret.
    #[error("invalid registry response for {name}: {reason}")]
    InvalidDocument { name: String, reason: String },

    /// The payload does not match its published digest.
    #[error("integrity check failed for {name}-{version}")]
    Integrity { name: String, version: String },

    /// Local storage failure while materializing a module.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The constraint string could not be parsed.
    #[error(transparent)]
    Constraint(#[from] ConstraintError),
}

impl ProviderError {
    /// Returns true if the error means the module or a satisfying version
    /// is absent, as opposed to a transport or storage failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            ProviderError::NotFound { .. } | ProviderError::NoMatchingVersion { .. } => true,
            ProviderError::HttpStatus { status, .. } => *status == 404,
            _ => false,
        }
    }
}

/// Everything a provider needs for one closure walk.
///
/// Providers are constructed per walk from this context; nothing here is
/// global. The HTTP client is shared, the storage backend and the event sink
/// belong to the walk.
#[derive(Clone)]
pub struct ProviderContext {
    pub storage: Arc<dyn Storage>,
    pub events: EventSink,
    pub client: Arc<dyn AsyncHttpClient>,
    pub config: ClientConfig,
    /// Payloads larger than this emit `Progress` events.
    pub progress_threshold: u64,
}

/// One registry ecosystem's protocol.
///
/// Names passed to every method are already escaped with
/// [`PackageProvider::escape_name`]; providers unescape them for messages.
///
/// # Implementors
///
/// - [`NpmProvider`](super::NpmProvider): the reference implementation
/// - [`PypiProvider`](super::PypiProvider): payload-only, no dependency entries
pub trait PackageProvider: Send + Sync {
    /// Short ecosystem name for logging.
    fn name(&self) -> &str;

    /// Escape a module name for network and storage identifiers.
    fn escape_name(&self, name: &str) -> String {
        escape_name(name)
    }

    /// Pick exactly one concrete version for `name`.
    ///
    /// Unconstrained requests use the registry's "latest" tag, falling back
    /// to the highest listed version with a warning. Ranged requests take
    /// the newest satisfying version.
    fn resolve_version<'a>(
        &'a self,
        name: &'a str,
        constraint: &'a VersionConstraint,
    ) -> BoxFuture<'a, ProviderResult<String>>;

    /// Write the manifest snapshot and payload(s) under `destination`.
    fn fetch_manifest_and_payload<'a>(
        &'a self,
        name: &'a str,
        version: &'a str,
        destination: &'a Path,
    ) -> BoxFuture<'a, ProviderResult<MaterializedModule>>;

    /// Returns true if `destination` already holds a version of `name`
    /// satisfying `constraint`.
    fn is_already_present<'a>(
        &'a self,
        name: &'a str,
        constraint: &'a VersionConstraint,
        destination: &'a Path,
    ) -> BoxFuture<'a, ProviderResult<bool>>;

    /// Read the manifest snapshot of a materialized module back from storage.
    fn read_manifest<'a>(
        &'a self,
        module: &'a MaterializedModule,
    ) -> BoxFuture<'a, ProviderResult<ManifestDescriptor>>;

    /// Escaped name of the auxiliary artifact for `name`, if the ecosystem
    /// has one.
    fn auxiliary_name(&self, _name: &str) -> Option<String> {
        None
    }

    /// Fetch the ecosystem-specific side artifact for `name@version`.
    ///
    /// Returns `Ok(None)` when the ecosystem has no such artifact. Callers
    /// treat errors as warnings.
    fn fetch_auxiliary_artifact<'a>(
        &'a self,
        _name: &'a str,
        _version: &'a str,
        _destination: &'a Path,
    ) -> BoxFuture<'a, ProviderResult<Option<MaterializedModule>>> {
        Box::pin(async { Ok(None) })
    }
}
