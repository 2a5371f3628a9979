//! Archive assembly.
//!
//! Packs a materialized fetch root into one tar archive:
//!
//! 1. Depth-first traversal of the root through the [`Storage`] abstraction,
//!    siblings in sorted order
//! 2. Every regular file is read in full and appended as an entry named by
//!    its `/`-separated path relative to the root
//! 3. The encoder is finalized and handed out as an [`ArchiveStream`]
//!
//! No compression is applied here. Entry headers are normalized (mode 0644,
//! mtime 0) so the same tree always yields the same bytes.

mod stream;

pub use stream::{ArchiveStream, STREAM_CHUNK_SIZE};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::events::{EventSink, ProgressEvent};
use crate::storage::{EntryKind, Storage, StorageError};

/// Result type for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors raised while packing.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Reading the materialized tree failed.
    #[error("failed to read fetch root: {0}")]
    Storage(#[from] StorageError),

    /// The tar encoder rejected an entry.
    #[error("failed to encode {entry}: {source}")]
    Encode {
        entry: String,
        #[source]
        source: io::Error,
    },
}

/// Accumulator for one pack operation.
///
/// `total_size` always equals the sum of the byte lengths of the files
/// appended so far.
pub struct ArchiveState {
    builder: tar::Builder<Vec<u8>>,
    total_size: u64,
    entries: usize,
}

impl Default for ArchiveState {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveState {
    pub fn new() -> Self {
        let mut builder = tar::Builder::new(Vec::new());
        builder.mode(tar::HeaderMode::Deterministic);
        Self {
            builder,
            total_size: 0,
            entries: 0,
        }
    }

    /// Append one regular file.
    pub fn append_file(&mut self, entry: &str, contents: &[u8]) -> ArchiveResult<()> {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);

        self.builder
            .append_data(&mut header, entry, contents)
            .map_err(|source| ArchiveError::Encode {
                entry: entry.to_string(),
                source,
            })?;
        self.total_size += contents.len() as u64;
        self.entries += 1;
        Ok(())
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Write the end-of-archive marker and return the encoded bytes.
    pub fn finish(self) -> ArchiveResult<PackedArchive> {
        let Self {
            builder,
            total_size,
            entries,
        } = self;
        let data = builder.into_inner().map_err(|source| ArchiveError::Encode {
            entry: "end of archive".to_string(),
            source,
        })?;
        Ok(PackedArchive {
            stream: ArchiveStream::new(data),
            total_size,
            entries,
        })
    }
}

/// Result of a pack operation.
#[derive(Debug)]
pub struct PackedArchive {
    pub stream: ArchiveStream,
    /// Sum of the byte lengths of every packed file.
    pub total_size: u64,
    pub entries: usize,
}

/// Packs a storage subtree into a tar archive.
pub struct ArchiveAssembler {
    storage: Arc<dyn Storage>,
}

impl ArchiveAssembler {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Pack every regular file under `root`.
    pub async fn pack(&self, root: &Path) -> ArchiveResult<PackedArchive> {
        let mut state = ArchiveState::new();

        // Explicit stack; children are pushed in reverse so they pop sorted
        let mut pending: Vec<(PathBuf, String)> = vec![(root.to_path_buf(), String::new())];
        while let Some((dir, prefix)) = pending.pop() {
            let names = self.storage.read_dir(&dir).await?;
            let mut subdirs = Vec::new();

            for name in names {
                let path = dir.join(&name);
                let entry = if prefix.is_empty() {
                    name
                } else {
                    format!("{}/{}", prefix, name)
                };

                match self.storage.stat(&path).await? {
                    EntryKind::Directory => subdirs.push((path, entry)),
                    EntryKind::File { .. } => {
                        let contents = self.storage.read_file(&path).await?;
                        state.append_file(&entry, &contents)?;
                        debug!(entry = %entry, bytes = contents.len(), "Packed file");
                    }
                }
            }
            pending.extend(subdirs.into_iter().rev());
        }

        let packed = state.finish()?;
        info!(
            root = %root.display(),
            entries = packed.entries,
            total_size = packed.total_size,
            archive_len = packed.stream.archive_len(),
            "Archive packed"
        );
        Ok(packed)
    }

    /// Pack `root` and report the outcome on `events`.
    ///
    /// Emits `finished packing, starting download` and then `Complete` on
    /// success, or `FatalError` if the tree could not be packed.
    pub async fn assemble(&self, root: &Path, events: &EventSink) -> ArchiveResult<u64> {
        match self.pack(root).await {
            Ok(packed) => {
                events.success("finished packing, starting download");
                events.emit(ProgressEvent::Complete {
                    total_size: packed.total_size,
                    stream: packed.stream,
                });
                Ok(packed.total_size)
            }
            Err(e) => {
                events.fatal(format!("failed to pack archive: {}", e));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Read;

    use futures::StreamExt;
    use proptest::prelude::*;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::events::channel;
    use crate::storage::MemoryStorage;

    async fn populate(storage: &MemoryStorage, files: &[(&str, &[u8])]) {
        for (path, contents) in files {
            let path = Path::new(path);
            if let Some(parent) = path.parent() {
                storage.mkdir(parent).await.unwrap();
            }
            storage.write_file(path, contents.to_vec()).await.unwrap();
        }
    }

    fn entries(archive: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut reader = tar::Archive::new(archive);
        reader
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let name = entry.path().unwrap().to_string_lossy().into_owned();
                let mut contents = Vec::new();
                entry.read_to_end(&mut contents).unwrap();
                (name, contents)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_pack_relative_sorted_entries() {
        let storage = MemoryStorage::new();
        populate(
            &storage,
            &[
                ("/root/b-1.0.0/b-1.0.0.tgz", b"bbb"),
                ("/root/a-1.0.0/packages/a-1.0.0.json", b"{}"),
                ("/root/a-1.0.0/a-1.0.0.tgz", b"aaaa"),
                ("/elsewhere/ignored", b"x"),
            ],
        )
        .await;
        storage.mkdir(Path::new("/root/empty")).await.unwrap();

        let assembler = ArchiveAssembler::new(Arc::new(storage));
        let packed = assembler.pack(Path::new("/root")).await.unwrap();

        assert_eq!(packed.total_size, 9);
        assert_eq!(packed.entries, 3);
        let archive = packed.stream.into_bytes();
        let names: Vec<String> = entries(&archive).into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                "a-1.0.0/a-1.0.0.tgz",
                "a-1.0.0/packages/a-1.0.0.json",
                "b-1.0.0/b-1.0.0.tgz",
            ]
        );
    }

    #[tokio::test]
    async fn test_pack_is_deterministic() {
        let storage = MemoryStorage::new();
        populate(&storage, &[("/r/x/file", b"same"), ("/r/y", b"bytes")]).await;
        let assembler = ArchiveAssembler::new(Arc::new(storage));

        let first = assembler.pack(Path::new("/r")).await.unwrap();
        let second = assembler.pack(Path::new("/r")).await.unwrap();
        assert_eq!(first.stream.into_bytes(), second.stream.into_bytes());
    }

    #[tokio::test]
    async fn test_pack_empty_root() {
        let assembler = ArchiveAssembler::new(Arc::new(MemoryStorage::new()));
        let packed = assembler.pack(Path::new("/")).await.unwrap();
        assert_eq!(packed.total_size, 0);
        assert_eq!(packed.entries, 0);
        // Two zero blocks terminate an empty tar archive
        assert_eq!(packed.stream.archive_len(), 1024);
    }

    #[tokio::test]
    async fn test_long_entry_names() {
        let storage = MemoryStorage::new();
        let long = format!("/r/{}/{}.tgz", "d".repeat(120), "f".repeat(120));
        populate(&storage, &[(long.as_str(), b"z")]).await;

        let packed = ArchiveAssembler::new(Arc::new(storage))
            .pack(Path::new("/r"))
            .await
            .unwrap();
        let archive = packed.stream.into_bytes();
        let found = entries(&archive);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, long.trim_start_matches("/r/"));
    }

    #[tokio::test]
    async fn test_assemble_emits_status_then_complete() {
        let storage = MemoryStorage::new();
        populate(&storage, &[("/r/a", b"12345")]).await;
        let (sink, mut stream) = channel(CancellationToken::new());

        let total = ArchiveAssembler::new(Arc::new(storage))
            .assemble(Path::new("/r"), &sink)
            .await
            .unwrap();
        drop(sink);
        assert_eq!(total, 5);

        let first = stream.next().await.unwrap();
        assert_eq!(
            first.as_status().map(|(m, _)| m),
            Some("finished packing, starting download")
        );
        match stream.next().await.unwrap() {
            ProgressEvent::Complete { total_size, stream } => {
                assert_eq!(total_size, 5);
                assert!(stream.archive_len() > 5);
            }
            other => panic!("expected Complete, got {:?}", other),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_assemble_missing_root_is_fatal() {
        let (sink, mut stream) = channel(CancellationToken::new());
        let result = ArchiveAssembler::new(Arc::new(MemoryStorage::new()))
            .assemble(Path::new("/missing"), &sink)
            .await;
        drop(sink);

        assert!(matches!(result, Err(ArchiveError::Storage(_))));
        assert!(matches!(
            stream.next().await,
            Some(ProgressEvent::FatalError { .. })
        ));
    }

    #[test]
    fn test_state_tracks_running_total() {
        let mut state = ArchiveState::new();
        state.append_file("a", &[0; 10]).unwrap();
        assert_eq!(state.total_size(), 10);
        state.append_file("b/c", &[0; 3]).unwrap();
        assert_eq!(state.total_size(), 13);
        assert_eq!(state.entries(), 2);
    }

    proptest! {
        #[test]
        fn prop_total_size_is_sum_of_file_lengths(
            files in proptest::collection::btree_map(
                "[a-z]{1,8}(/[a-z]{1,8}){0,2}",
                proptest::collection::vec(any::<u8>(), 0..512),
                0..12,
            )
        ) {
            // A path may not be both a file and a directory
            let files: BTreeMap<String, Vec<u8>> = files
                .iter()
                .filter(|(path, _)| {
                    !files.keys().any(|other| other.starts_with(&format!("{}/", path)))
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let expected: u64 = files.values().map(|v| v.len() as u64).sum();

            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            let packed = runtime.block_on(async {
                let storage = MemoryStorage::new();
                storage.mkdir(Path::new("/root")).await.unwrap();
                for (path, contents) in &files {
                    let full = Path::new("/root").join(path);
                    storage.mkdir(full.parent().unwrap()).await.unwrap();
                    storage.write_file(&full, contents.clone()).await.unwrap();
                }
                ArchiveAssembler::new(Arc::new(storage))
                    .pack(Path::new("/root"))
                    .await
                    .unwrap()
            });

            prop_assert_eq!(packed.total_size, expected);
            prop_assert_eq!(packed.entries, files.len());
        }
    }
}
