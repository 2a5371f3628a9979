//! Outbound archive byte stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Size of each chunk handed to the consumer.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// A finished archive, delivered as a stream of chunks.
///
/// The chunks are zero-copy slices of one shared buffer.
#[derive(Debug, Clone)]
pub struct ArchiveStream {
    data: Bytes,
    offset: usize,
}

impl ArchiveStream {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            offset: 0,
        }
    }

    /// Length of the encoded archive in bytes (headers and padding included).
    pub fn archive_len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Bytes not yet yielded.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// The rest of the archive as one buffer.
    pub fn into_bytes(self) -> Bytes {
        self.data.slice(self.offset..)
    }

    /// Copy the rest of the archive into `writer` and flush it.
    pub async fn write_to<W>(self, writer: &mut W) -> std::io::Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0u64;
        let data = self.into_bytes();
        for chunk in data.chunks(STREAM_CHUNK_SIZE) {
            writer.write_all(chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }
}

impl Stream for ArchiveStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.offset >= self.data.len() {
            return Poll::Ready(None);
        }
        let end = (self.offset + STREAM_CHUNK_SIZE).min(self.data.len());
        let chunk = self.data.slice(self.offset..end);
        self.offset = end;
        Poll::Ready(Some(chunk))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let chunks = self.remaining().div_ceil(STREAM_CHUNK_SIZE);
        (chunks, Some(chunks))
    }
}
