//! Storage abstraction for materialized modules.
//!
//! The closure walker and the archive assembler never touch `std::fs` or
//! `tokio::fs` directly. They talk to a [`Storage`] implementation, which is
//! either a real directory on disk ([`DiskStorage`], one per CLI invocation)
//! or an ephemeral in-memory tree ([`MemoryStorage`], one per remote request).
//!
//! # Design Principles
//!
//! - **Pass-through only**: no caching, no policy, just the filesystem verbs
//! - **Dyn-compatible**: methods return [`BoxFuture`] so callers can hold an
//!   `Arc<dyn Storage>` and stay oblivious to the backend
//! - **Idempotent `mkdir`**: creating an existing directory is not an error,
//!   so concurrent branches may race on the same path
//!
//! # Example
//!
//! ```ignore
//! use std::path::Path;
//! use depclone::storage::{MemoryStorage, Storage};
//!
//! let storage = MemoryStorage::new();
//! storage.mkdir(Path::new("/left-pad")).await?;
//! storage.write_file(Path::new("/left-pad/index.js"), b"module.exports = 1".to_vec()).await?;
//! assert!(storage.exists(Path::new("/left-pad/index.js")).await);
//! ```

mod disk;
mod memory;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use thiserror::Error;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The path does not exist.
    #[error("no such file or directory: {}", path.display())]
    NotFound { path: PathBuf },

    /// A directory operation was attempted on a file.
    #[error("not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    /// A file operation was attempted on a directory.
    #[error("is a directory: {}", path.display())]
    IsADirectory { path: PathBuf },

    /// Any other I/O failure reported by the backend.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    /// Map an `io::Error` for `path` onto the storage taxonomy.
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound {
                path: path.to_path_buf(),
            },
            _ => Self::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Returns true if the error means the path is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Kind of a storage entry as reported by [`Storage::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file with its length in bytes.
    File { len: u64 },
    /// A directory.
    Directory,
}

impl EntryKind {
    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory)
    }
}

/// Incremental writer returned by [`Storage::open_write_stream`].
///
/// Data written through the handle becomes visible to readers only after
/// [`StorageWriter::finish`] resolves. For the disk backend `finish` also
/// syncs the file, so a successful `finish` means the payload is durable.
pub trait StorageWriter: Send {
    /// Append a chunk to the file.
    fn write_chunk<'a>(&'a mut self, chunk: &'a [u8]) -> BoxFuture<'a, StorageResult<()>>;

    /// Flush and close the file, returning the total number of bytes written.
    fn finish(self: Box<Self>) -> BoxFuture<'static, StorageResult<u64>>;
}

/// Minimal filesystem capability set shared by every backend.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a single backend instance is shared
/// by every concurrent branch of a closure walk.
pub trait Storage: Send + Sync {
    /// Short backend name for logging ("disk", "memory").
    fn backend_name(&self) -> &str;

    /// Returns true if anything exists at `path`.
    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool>;

    /// Create `path` and any missing parents.
    ///
    /// An existing directory at `path` is not an error.
    fn mkdir<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, StorageResult<()>>;

    /// List the names of the entries directly under `path`, sorted.
    fn read_dir<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, StorageResult<Vec<String>>>;

    /// Report whether `path` is a file or a directory.
    fn stat<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, StorageResult<EntryKind>>;

    /// Read the full contents of the file at `path`.
    fn read_file<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, StorageResult<Vec<u8>>>;

    /// Replace the file at `path` with `contents`. The parent must exist.
    fn write_file<'a>(
        &'a self,
        path: &'a Path,
        contents: Vec<u8>,
    ) -> BoxFuture<'a, StorageResult<()>>;

    /// Open `path` for incremental writing. The parent must exist.
    fn open_write_stream<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxFuture<'a, StorageResult<Box<dyn StorageWriter>>>;

    /// Join path segments onto `base`.
    fn join(&self, base: &Path, segments: &[&str]) -> PathBuf {
        segments
            .iter()
            .fold(base.to_path_buf(), |acc, segment| acc.join(segment))
    }
}
