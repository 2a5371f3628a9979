//! In-memory storage backend.
//!
//! Holds the whole materialized tree in a `BTreeMap` keyed by normalized
//! absolute path. Used for ephemeral fetches where the archive is the only
//! output and nothing should touch the disk.
//!
//! The map sits behind a `parking_lot::RwLock`; every operation takes the lock
//! once, so a check-then-insert (e.g. `mkdir` of a path another branch is also
//! creating) is atomic.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{BoxFuture, EntryKind, Storage, StorageError, StorageResult, StorageWriter};

/// A node of the in-memory tree.
#[derive(Debug, Clone)]
enum Node {
    Directory,
    File(Arc<Vec<u8>>),
}

type Tree = BTreeMap<PathBuf, Node>;

/// Ephemeral storage backend keeping every file in memory.
///
/// Cloning is cheap and clones share the same tree.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    tree: Arc<RwLock<Tree>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create an empty storage containing only the root directory.
    pub fn new() -> Self {
        let mut tree = Tree::new();
        tree.insert(PathBuf::from("/"), Node::Directory);
        Self {
            tree: Arc::new(RwLock::new(tree)),
        }
    }

    /// Total bytes held across all files.
    pub fn size_bytes(&self) -> u64 {
        self.tree
            .read()
            .values()
            .map(|node| match node {
                Node::File(data) => data.len() as u64,
                Node::Directory => 0,
            })
            .sum()
    }

    /// Number of regular files held.
    pub fn file_count(&self) -> usize {
        self.tree
            .read()
            .values()
            .filter(|node| matches!(node, Node::File(_)))
            .count()
    }
}

/// Normalize any path into an absolute, `..`-free key.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Ensure the parent of `key` is an existing directory.
fn check_parent(tree: &Tree, key: &Path, logical: &Path) -> StorageResult<()> {
    let Some(parent) = key.parent() else {
        return Ok(());
    };
    match tree.get(parent) {
        Some(Node::Directory) => Ok(()),
        Some(Node::File(_)) => Err(StorageError::NotADirectory {
            path: parent.to_path_buf(),
        }),
        None => Err(StorageError::NotFound {
            path: logical.to_path_buf(),
        }),
    }
}

fn insert_file(tree: &RwLock<Tree>, logical: &Path, data: Vec<u8>) -> StorageResult<()> {
    let key = normalize(logical);
    let mut tree = tree.write();
    check_parent(&tree, &key, logical)?;
    if let Some(Node::Directory) = tree.get(&key) {
        return Err(StorageError::IsADirectory {
            path: logical.to_path_buf(),
        });
    }
    tree.insert(key, Node::File(Arc::new(data)));
    Ok(())
}

impl Storage for MemoryStorage {
    fn backend_name(&self) -> &str {
        "memory"
    }

    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool> {
        let key = normalize(path);
        Box::pin(async move { self.tree.read().contains_key(&key) })
    }

    fn mkdir<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, StorageResult<()>> {
        let key = normalize(path);
        Box::pin(async move {
            let mut tree = self.tree.write();
            let mut current = PathBuf::from("/");
            for component in key.components().skip(1) {
                current.push(component);
                match tree.get(&current) {
                    Some(Node::Directory) => {}
                    Some(Node::File(_)) => {
                        return Err(StorageError::NotADirectory { path: current });
                    }
                    None => {
                        tree.insert(current.clone(), Node::Directory);
                    }
                }
            }
            Ok(())
        })
    }

    fn read_dir<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, StorageResult<Vec<String>>> {
        let key = normalize(path);
        Box::pin(async move {
            let tree = self.tree.read();
            match tree.get(&key) {
                Some(Node::Directory) => {}
                Some(Node::File(_)) => {
                    return Err(StorageError::NotADirectory {
                        path: path.to_path_buf(),
                    })
                }
                None => {
                    return Err(StorageError::NotFound {
                        path: path.to_path_buf(),
                    })
                }
            }

            // BTreeMap iteration is ordered, so the names come out sorted
            let names = tree
                .range(key.clone()..)
                .skip(1)
                .take_while(|(candidate, _)| candidate.starts_with(&key))
                .filter(|(candidate, _)| candidate.parent() == Some(key.as_path()))
                .filter_map(|(candidate, _)| {
                    candidate
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                })
                .collect();
            Ok(names)
        })
    }

    fn stat<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, StorageResult<EntryKind>> {
        let key = normalize(path);
        Box::pin(async move {
            match self.tree.read().get(&key) {
                Some(Node::Directory) => Ok(EntryKind::Directory),
                Some(Node::File(data)) => Ok(EntryKind::File {
                    len: data.len() as u64,
                }),
                None => Err(StorageError::NotFound {
                    path: path.to_path_buf(),
                }),
            }
        })
    }

    fn read_file<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, StorageResult<Vec<u8>>> {
        let key = normalize(path);
        Box::pin(async move {
            match self.tree.read().get(&key) {
                Some(Node::File(data)) => Ok(data.as_ref().clone()),
                Some(Node::Directory) => Err(StorageError::IsADirectory {
                    path: path.to_path_buf(),
                }),
                None => Err(StorageError::NotFound {
                    path: path.to_path_buf(),
                }),
            }
        })
    }

    fn write_file<'a>(
        &'a self,
        path: &'a Path,
        contents: Vec<u8>,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move { insert_file(&self.tree, path, contents) })
    }

    fn open_write_stream<'a>(
        &'a self,
        path: &'a Path,
    ) -> BoxFuture<'a, StorageResult<Box<dyn StorageWriter>>> {
        Box::pin(async move {
            // Fail early, the same way File::create would
            {
                let tree = self.tree.read();
                let key = normalize(path);
                check_parent(&tree, &key, path)?;
                if let Some(Node::Directory) = tree.get(&key) {
                    return Err(StorageError::IsADirectory {
                        path: path.to_path_buf(),
                    });
                }
            }
            let writer: Box<dyn StorageWriter> = Box::new(MemoryWriter {
                tree: Arc::clone(&self.tree),
                path: path.to_path_buf(),
                buffer: Vec::new(),
            });
            Ok(writer)
        })
    }
}

/// Buffers a streamed file and publishes it to the tree on `finish`.
struct MemoryWriter {
    tree: Arc<RwLock<Tree>>,
    path: PathBuf,
    buffer: Vec<u8>,
}

impl StorageWriter for MemoryWriter {
    fn write_chunk<'a>(&'a mut self, chunk: &'a [u8]) -> BoxFuture<'a, StorageResult<()>> {
        self.buffer.extend_from_slice(chunk);
        Box::pin(async { Ok(()) })
    }

    fn finish(self: Box<Self>) -> BoxFuture<'static, StorageResult<u64>> {
        Box::pin(async move {
            let MemoryWriter { tree, path, buffer } = *self;
            let len = buffer.len() as u64;
            insert_file(&tree, &path, buffer)?;
            Ok(len)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("a/b")), PathBuf::from("/a/b"));
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/../..")), PathBuf::from("/"));
    }

    #[tokio::test]
    async fn test_memory_storage_new_has_root() {
        let storage = MemoryStorage::new();
        assert!(storage.exists(Path::new("/")).await);
        assert_eq!(storage.file_count(), 0);
        assert_eq!(storage.size_bytes(), 0);
    }

    #[tokio::test]
    async fn test_mkdir_creates_parents_and_is_idempotent() {
        let storage = MemoryStorage::new();
        storage.mkdir(Path::new("/a/b/c")).await.unwrap();
        storage.mkdir(Path::new("/a/b/c")).await.unwrap();

        assert!(storage.stat(Path::new("/a")).await.unwrap().is_dir());
        assert!(storage.stat(Path::new("/a/b")).await.unwrap().is_dir());
        assert!(storage.stat(Path::new("/a/b/c")).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_mkdir_over_file_fails() {
        let storage = MemoryStorage::new();
        storage
            .write_file(Path::new("/f"), b"x".to_vec())
            .await
            .unwrap();

        let err = storage.mkdir(Path::new("/f/sub")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotADirectory { .. }));
    }

    #[tokio::test]
    async fn test_write_requires_parent() {
        let storage = MemoryStorage::new();
        let err = storage
            .write_file(Path::new("/missing/file.txt"), vec![1])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_read_dir_lists_direct_children_only() {
        let storage = MemoryStorage::new();
        storage.mkdir(Path::new("/pkg/packages")).await.unwrap();
        storage.mkdir(Path::new("/pkg-other")).await.unwrap();
        storage
            .write_file(Path::new("/pkg/z.tgz"), vec![1, 2])
            .await
            .unwrap();
        storage
            .write_file(Path::new("/pkg/packages/z.json"), vec![3])
            .await
            .unwrap();

        let names = storage.read_dir(Path::new("/pkg")).await.unwrap();
        assert_eq!(names, vec!["packages".to_string(), "z.tgz".to_string()]);

        let root = storage.read_dir(Path::new("/")).await.unwrap();
        assert_eq!(root, vec!["pkg".to_string(), "pkg-other".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_writer_is_invisible_until_finish() {
        let storage = MemoryStorage::new();
        let mut writer = storage
            .open_write_stream(Path::new("/payload.bin"))
            .await
            .unwrap();
        writer.write_chunk(&[1, 2, 3]).await.unwrap();

        assert!(!storage.exists(Path::new("/payload.bin")).await);

        assert_eq!(writer.finish().await.unwrap(), 3);
        assert_eq!(
            storage.read_file(Path::new("/payload.bin")).await.unwrap(),
            vec![1, 2, 3]
        );
        assert_eq!(storage.size_bytes(), 3);
    }

    #[tokio::test]
    async fn test_clones_share_tree() {
        let storage = MemoryStorage::new();
        let clone = storage.clone();
        clone
            .write_file(Path::new("/shared"), b"data".to_vec())
            .await
            .unwrap();
        assert!(storage.exists(Path::new("/shared")).await);
    }
}
