//! depclone - fetch a package's dependency closure into one archive
//!
//! Given a set of top-level module requests for a registry ecosystem (npm,
//! PyPI), depclone resolves each to a concrete version, downloads its manifest
//! and payload, recursively expands declared dependencies without fetching any
//! module twice, and packs everything into a single tar stream. Progress and
//! status updates flow to the caller over one ordered event channel.
//!
//! The usual entry point is [`FetchSession`]; the lower layers
//! ([`provider`], [`walker`], [`archive`], [`storage`]) are public for callers
//! that need to compose them differently.

pub mod archive;
pub mod config;
pub mod events;
pub mod logging;
pub mod package;
pub mod provider;
pub mod session;
pub mod storage;
pub mod walker;

pub use archive::{ArchiveAssembler, ArchiveError, ArchiveStream};
pub use config::{ConfigError, ConfigFile, ConfigKey};
pub use events::{CancelHandle, EventSink, EventStream, ProgressEvent, Severity};
pub use package::{
    FetchRequest, ManifestDescriptor, MaterializedModule, PackageFile, VersionConstraint,
};
pub use provider::{
    AsyncHttpClient, ClientConfig, Ecosystem, PackageProvider, ProviderError, ProviderFactory,
};
pub use session::{FetchSession, FetchSessionBuilder, SessionError};
pub use storage::{DiskStorage, MemoryStorage, Storage, StorageError};
pub use walker::{AuxiliaryPolicy, ClosureWalker, WalkOptions, WalkReport};
