//! Disk-backed storage rooted at a real directory.
//!
//! Logical paths handed to [`DiskStorage`] are interpreted relative to its
//! root, so `/left-pad-1.3.0/packages` lands under `<root>/left-pad-1.3.0/packages`.
//! This keeps the walker's path arithmetic identical for the disk and memory
//! backends.

use std::path::{Component, Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};

use tracing::warn;

use super::{BoxFuture, EntryKind, Storage, StorageError, StorageResult, StorageWriter};

/// Buffer size for streamed writes (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Suffix of files still being streamed.
const PARTIAL_SUFFIX: &str = ".partial";

/// Storage backend writing to a directory on disk.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    /// Create a disk storage rooted at `root`.
    ///
    /// The directory is created lazily by the first `mkdir`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The real directory backing this storage.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a logical path onto the real filesystem.
    ///
    /// `..` components never climb above the root.
    fn resolve(&self, path: &Path) -> PathBuf {
        let mut relative = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::ParentDir => {
                    relative.pop();
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        self.root.join(relative)
    }
}

impl Storage for DiskStorage {
    fn backend_name(&self) -> &str {
        "disk"
    }

    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool> {
        Box::pin(async move { fs::try_exists(self.resolve(path)).await.unwrap_or(false) })
    }

    fn mkdir<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let real = self.resolve(path);
            match fs::create_dir_all(&real).await {
                Ok(()) => Ok(()),
                // Another branch may have won the race
                Err(_) if fs::metadata(&real).await.map(|m| m.is_dir()).unwrap_or(false) => {
                    Ok(())
                }
                Err(e) => Err(StorageError::from_io(path, e)),
            }
        })
    }

    fn read_dir<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, StorageResult<Vec<String>>> {
        Box::pin(async move {
            let real = self.resolve(path);
            let metadata = fs::metadata(&real)
                .await
                .map_err(|e| StorageError::from_io(path, e))?;
            if !metadata.is_dir() {
                return Err(StorageError::NotADirectory {
                    path: path.to_path_buf(),
                });
            }

            let mut reader = fs::read_dir(&real)
                .await
                .map_err(|e| StorageError::from_io(path, e))?;
            let mut names = Vec::new();
            while let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|e| StorageError::from_io(path, e))?
            {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            Ok(names)
        })
    }

    fn stat<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, StorageResult<EntryKind>> {
        Box::pin(async move {
            let metadata = fs::metadata(self.resolve(path))
                .await
                .map_err(|e| StorageError::from_io(path, e))?;
            if metadata.is_dir() {
                Ok(EntryKind::Directory)
            } else {
                Ok(EntryKind::File {
                    len: metadata.len(),
                })
            }
        })
    }

    fn read_file<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, StorageResult<Vec<u8>>> {
        Box::pin(async move {
            let real = self.resolve(path);
            if fs::metadata(&real).await.map(|m| m.is_dir()).unwrap_or(false) {
                return Err(StorageError::IsADirectory {
                    path: path.to_path_buf(),
                });
            }
            fs::read(&real)
                .await
                .map_err(|e| StorageError::from_io(path, e))
        })
    }

    fn write_file<'a>(
        &'a self,
        path: &'a Path,
        contents: Vec<u8>,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            fs::write(self.resolve(path), contents)
                .await
                .map_err(|e| StorageError::from_io(path, e))
        })
    }

    fn open_write_stream<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxFuture<'a, StorageResult<Box<dyn StorageWriter>>> {
        Box::pin(async move {
            let target = self.resolve(path);
            let partial = partial_path(&target);
            let file = File::create(&partial)
                .await
                .map_err(|e| StorageError::from_io(path, e))?;
            let writer: Box<dyn StorageWriter> = Box::new(DiskWriter {
                path: path.to_path_buf(),
                target,
                partial,
                inner: Some(BufWriter::with_capacity(BUFFER_SIZE, file)),
                written: 0,
                committed: false,
            });
            Ok(writer)
        })
    }
}

/// Hidden sibling that receives a streamed file until it is finished.
fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}{}", name, PARTIAL_SUFFIX))
}

/// Streaming writer for [`DiskStorage`].
///
/// Bytes go to a `.<name>.partial` sibling which is renamed onto the target
/// by `finish`. A writer dropped before that removes the partial file.
struct DiskWriter {
    path: PathBuf,
    target: PathBuf,
    partial: PathBuf,
    inner: Option<BufWriter<File>>,
    written: u64,
    committed: bool,
}

impl StorageWriter for DiskWriter {
    fn write_chunk<'a>(&'a mut self, chunk: &'a [u8]) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let Some(inner) = self.inner.as_mut() else {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source: std::io::Error::other("writer already closed"),
                });
            };
            inner
                .write_all(chunk)
                .await
                .map_err(|e| StorageError::from_io(&self.path, e))?;
            self.written += chunk.len() as u64;
            Ok(())
        })
    }

    fn finish(mut self: Box<Self>) -> BoxFuture<'static, StorageResult<u64>> {
        Box::pin(async move {
            let Some(mut inner) = self.inner.take() else {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source: std::io::Error::other("writer already closed"),
                });
            };
            inner
                .flush()
                .await
                .map_err(|e| StorageError::from_io(&self.path, e))?;
            inner
                .into_inner()
                .sync_all()
                .await
                .map_err(|e| StorageError::from_io(&self.path, e))?;
            fs::rename(&self.partial, &self.target)
                .await
                .map_err(|e| StorageError::from_io(&self.path, e))?;
            self.committed = true;
            Ok(self.written)
        })
    }
}

impl Drop for DiskWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Close the handle before unlinking
        self.inner.take();
        if let Err(e) = std::fs::remove_file(&self.partial) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.partial.display(), error = %e, "Failed to remove partial file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_strips_root_and_parent_dirs() {
        let storage = DiskStorage::new("/tmp/fetch-root");
        assert_eq!(
            storage.resolve(Path::new("/left-pad/packages")),
            PathBuf::from("/tmp/fetch-root/left-pad/packages")
        );
        assert_eq!(
            storage.resolve(Path::new("/../../etc/passwd")),
            PathBuf::from("/tmp/fetch-root/etc/passwd")
        );
    }

    #[tokio::test]
    async fn test_mkdir_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(temp.path());

        storage.mkdir(Path::new("/a/b")).await.unwrap();
        storage.mkdir(Path::new("/a/b")).await.unwrap();

        assert!(storage.exists(Path::new("/a/b")).await);
        assert_eq!(storage.stat(Path::new("/a")).await.unwrap(), EntryKind::Directory);
    }

    #[tokio::test]
    async fn test_write_stream_then_read() {
        let temp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(temp.path());
        storage.mkdir(Path::new("/pkg")).await.unwrap();

        let mut writer = storage
            .open_write_stream(Path::new("/pkg/payload.tgz"))
            .await
            .unwrap();
        writer.write_chunk(b"hello ").await.unwrap();
        writer.write_chunk(b"world").await.unwrap();
        let written = writer.finish().await.unwrap();

        assert_eq!(written, 11);
        assert_eq!(
            storage.read_file(Path::new("/pkg/payload.tgz")).await.unwrap(),
            b"hello world"
        );
        assert_eq!(
            storage.stat(Path::new("/pkg/payload.tgz")).await.unwrap(),
            EntryKind::File { len: 11 }
        );
    }

    #[tokio::test]
    async fn test_read_dir_sorted_and_missing() {
        let temp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(temp.path());
        storage.mkdir(Path::new("/d")).await.unwrap();
        storage
            .write_file(Path::new("/d/b.txt"), b"b".to_vec())
            .await
            .unwrap();
        storage
            .write_file(Path::new("/d/a.txt"), b"a".to_vec())
            .await
            .unwrap();

        assert_eq!(
            storage.read_dir(Path::new("/d")).await.unwrap(),
            vec!["a.txt".to_string(), "b.txt".to_string()]
        );
        assert!(storage
            .read_dir(Path::new("/nope"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_read_file_on_directory_fails() {
        let temp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(temp.path());
        storage.mkdir(Path::new("/d")).await.unwrap();

        let err = storage.read_file(Path::new("/d")).await.unwrap_err();
        assert!(matches!(err, StorageError::IsADirectory { .. }));
    }

    #[tokio::test]
    async fn test_unfinished_writer_leaves_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(temp.path());
        storage.mkdir(Path::new("/app")).await.unwrap();

        let mut writer = storage
            .open_write_stream(Path::new("/app/dep-1.0.0.tgz"))
            .await
            .unwrap();
        writer.write_chunk(b"0123456789").await.unwrap();
        assert!(!storage.exists(Path::new("/app/dep-1.0.0.tgz")).await);
        drop(writer);

        assert!(storage.read_dir(Path::new("/app")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finish_replaces_existing_file() {
        let temp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(temp.path());
        storage
            .write_file(Path::new("/payload.tgz"), b"old".to_vec())
            .await
            .unwrap();

        let mut writer = storage
            .open_write_stream(Path::new("/payload.tgz"))
            .await
            .unwrap();
        writer.write_chunk(b"new bytes").await.unwrap();
        writer.finish().await.unwrap();

        assert_eq!(
            storage.read_dir(Path::new("/")).await.unwrap(),
            vec!["payload.tgz".to_string()]
        );
        assert_eq!(
            storage.read_file(Path::new("/payload.tgz")).await.unwrap(),
            b"new bytes"
        );
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        assert_eq!(
            partial_path(Path::new("/r/app/dep-1.0.0.tgz")),
            PathBuf::from("/r/app/.dep-1.0.0.tgz.partial")
        );
    }
}
