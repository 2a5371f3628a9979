//! Streamed payload download into storage.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use sha2::{Digest, Sha512};
use tracing::{debug, warn};

use super::types::{ProviderContext, ProviderError, ProviderResult};
use crate::events::ProgressTracker;

/// Expected digest of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Integrity {
    sha512: Vec<u8>,
}

impl Integrity {
    /// Parse a Subresource Integrity string such as `sha512-<base64>`.
    ///
    /// Several space-separated hashes may be present; the first sha512 one
    /// is used. Other algorithms are ignored.
    pub(crate) fn parse(sri: &str) -> Option<Self> {
        sri.split_whitespace()
            .filter_map(|entry| entry.strip_prefix("sha512-"))
            .find_map(|encoded| BASE64.decode(encoded).ok())
            .map(|sha512| Self { sha512 })
    }

    fn matches(&self, digest: &[u8]) -> bool {
        self.sha512 == digest
    }
}

/// Identifies the artifact in errors.
pub(crate) struct ArtifactLabel<'a> {
    pub name: &'a str,
    pub version: &'a str,
}

/// Stream `url` into `path`, reporting progress for large payloads.
///
/// The file only becomes visible once the storage writer finishes, and the
/// writer is not finished when the integrity check fails.
pub(crate) async fn download_to_storage(
    ctx: &ProviderContext,
    url: &str,
    path: &Path,
    integrity: Option<&Integrity>,
    label: ArtifactLabel<'_>,
) -> ProviderResult<u64> {
    let response = ctx.client.get_stream(url).await?;
    let mut tracker = ProgressTracker::new(
        ctx.events.clone(),
        response.content_length,
        ctx.progress_threshold,
    );
    let mut writer = ctx.storage.open_write_stream(path).await?;
    let mut hasher = integrity.map(|_| Sha512::new());

    let mut body = response.body;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        writer.write_chunk(&chunk).await?;
        if let Some(hasher) = hasher.as_mut() {
            hasher.update(&chunk);
        }
        tracker.advance(chunk.len() as u64);
    }

    if let (Some(expected), Some(hasher)) = (integrity, hasher) {
        if !expected.matches(&hasher.finalize()) {
            warn!(url, "Payload digest mismatch");
            return Err(ProviderError::Integrity {
                name: label.name.to_string(),
                version: label.version.to_string(),
            });
        }
    }

    let written = writer.finish().await?;
    debug!(url, path = %path.display(), bytes = written, "Payload written");
    Ok(written)
}
