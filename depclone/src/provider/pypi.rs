//! PyPI provider.
//!
//! Uses the JSON API: `GET {pypi_url}/{name}/json` returns `info.version`
//! (the latest release), a `releases` map of version to file list, and
//! `urls`, the file list of the latest release.
//!
//! Every distribution file of the chosen release is downloaded under its
//! published filename. The manifest snapshot records the release and its
//! files. Requirement strings are not interpreted, so PyPI manifests carry no
//! dependency entries and a walk stops at the requested modules.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::documents::DocumentCache;
use super::download::{download_to_storage, ArtifactLabel, Integrity};
use super::resolve::{VersionListing, LATEST_TAG};
use super::types::{PackageProvider, ProviderContext, ProviderError, ProviderResult};
use crate::package::{
    manifest_file_name, unescape_name, ManifestDescriptor, MaterializedModule, VersionConstraint,
    MANIFEST_EXTENSION, PACKAGES_DIR,
};
use crate::storage::BoxFuture;

/// One distribution file of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ReleaseFile {
    filename: String,
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha512: Option<String>,
}

/// Manifest snapshot written to `packages/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReleaseSnapshot {
    name: String,
    version: String,
    files: Vec<ReleaseFile>,
}

/// PyPI JSON API provider.
pub struct PypiProvider {
    ctx: ProviderContext,
    documents: DocumentCache,
}

impl PypiProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        let documents = DocumentCache::new(ctx.client.clone());
        Self { ctx, documents }
    }

    async fn project(&self, name: &str) -> ProviderResult<Arc<Value>> {
        let url = format!(
            "{}/{}/json",
            self.ctx.config.pypi_url.trim_end_matches('/'),
            unescape_name(name)
        );
        self.documents.fetch(&url, &unescape_name(name)).await
    }

    async fn resolve(&self, name: &str, constraint: &VersionConstraint) -> ProviderResult<String> {
        let project = self.project(name).await?;
        listing_from_project(&project).select(&unescape_name(name), constraint, &self.ctx.events)
    }

    async fn fetch(
        &self,
        name: &str,
        version: &str,
        destination: &Path,
    ) -> ProviderResult<MaterializedModule> {
        let display_name = unescape_name(name);
        let project = self.project(name).await?;
        let files = release_files(&project, version).ok_or_else(|| {
            ProviderError::NoMatchingVersion {
                name: display_name.clone(),
                constraint: version.to_string(),
            }
        })?;
        if files.is_empty() {
            return Err(ProviderError::NotFound {
                name: display_name,
                reason: format!("release {} has no distribution files", version),
            });
        }

        let storage = &self.ctx.storage;
        let packages_dir = destination.join(PACKAGES_DIR);
        storage.mkdir(&packages_dir).await?;

        let mut payloads = Vec::with_capacity(files.len());
        for file in &files {
            self.ctx
                .events
                .info(format!("downloading {} of {}-{}", file.filename, display_name, version));
            let path = destination.join(&file.filename);
            let integrity = file
                .sha512
                .as_deref()
                .and_then(|digest| Integrity::parse(&format!("sha512-{}", digest)));
            download_to_storage(
                &self.ctx,
                &file.url,
                &path,
                integrity.as_ref(),
                ArtifactLabel {
                    name: &display_name,
                    version,
                },
            )
            .await?;
            payloads.push(path);
        }

        let snapshot = ReleaseSnapshot {
            name: display_name.clone(),
            version: version.to_string(),
            files,
        };
        let manifest = descriptor_from_snapshot(&snapshot);
        let manifest_path = packages_dir.join(manifest_file_name(name, version));
        let bytes =
            serde_json::to_vec_pretty(&snapshot).map_err(|e| ProviderError::InvalidDocument {
                name: display_name.clone(),
                reason: e.to_string(),
            })?;
        storage.write_file(&manifest_path, bytes).await?;

        info!(module = %display_name, version, files = payloads.len(), "Release materialized");
        self.ctx.events.success(format!("done cloning {}", display_name));

        Ok(MaterializedModule {
            directory: destination.to_path_buf(),
            payloads,
            manifest_path,
            manifest,
        })
    }

    async fn present(
        &self,
        name: &str,
        constraint: &VersionConstraint,
        destination: &Path,
    ) -> ProviderResult<bool> {
        let entries = match self
            .ctx
            .storage
            .read_dir(&destination.join(PACKAGES_DIR))
            .await
        {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        // Release versions need not be semver, so match on the known name
        let prefix = format!("{}-", name);
        let present = entries
            .iter()
            .filter_map(|entry| {
                entry
                    .strip_prefix(prefix.as_str())?
                    .strip_suffix(MANIFEST_EXTENSION)?
                    .strip_suffix('.')
            })
            .any(|version| constraint.is_unconstrained() || constraint.matches_str(version));
        debug!(module = name, present, "Checked for existing release");
        Ok(present)
    }

    async fn read_snapshot(&self, module: &MaterializedModule) -> ProviderResult<ManifestDescriptor> {
        let bytes = self.ctx.storage.read_file(&module.manifest_path).await?;
        let snapshot: ReleaseSnapshot =
            serde_json::from_slice(&bytes).map_err(|e| ProviderError::InvalidDocument {
                name: module.manifest.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(descriptor_from_snapshot(&snapshot))
    }
}

impl PackageProvider for PypiProvider {
    fn name(&self) -> &str {
        "pypi"
    }

    fn resolve_version<'a>(
        &'a self,
        name: &'a str,
        constraint: &'a VersionConstraint,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(self.resolve(name, constraint))
    }

    fn fetch_manifest_and_payload<'a>(
        &'a self,
        name: &'a str,
        version: &'a str,
        destination: &'a Path,
    ) -> BoxFuture<'a, ProviderResult<MaterializedModule>> {
        Box::pin(self.fetch(name, version, destination))
    }

    fn is_already_present<'a>(
        &'a self,
        name: &'a str,
        constraint: &'a VersionConstraint,
        destination: &'a Path,
    ) -> BoxFuture<'a, ProviderResult<bool>> {
        Box::pin(self.present(name, constraint, destination))
    }

    fn read_manifest<'a>(
        &'a self,
        module: &'a MaterializedModule,
    ) -> BoxFuture<'a, ProviderResult<ManifestDescriptor>> {
        Box::pin(self.read_snapshot(module))
    }
}

fn listing_from_project(project: &Value) -> VersionListing {
    let listed = project
        .get("releases")
        .and_then(Value::as_object)
        .map(|releases| releases.keys().cloned().collect())
        .unwrap_or_default();

    let mut tags = HashMap::new();
    if let Some(latest) = project.pointer("/info/version").and_then(Value::as_str) {
        tags.insert(LATEST_TAG.to_string(), latest.to_string());
    }

    VersionListing { listed, tags }
}

/// Files of `version`: `urls` for the latest release, `releases[version]`
/// otherwise. `None` when the release is not listed at all.
fn release_files(project: &Value, version: &str) -> Option<Vec<ReleaseFile>> {
    let latest = project.pointer("/info/version").and_then(Value::as_str);
    let list = match (latest, project.get("urls")) {
        (Some(latest), Some(urls)) if latest == version => urls,
        _ => project.get("releases")?.get(version)?,
    };

    Some(
        list.as_array()?
            .iter()
            .filter_map(|file| {
                Some(ReleaseFile {
                    filename: file.get("filename")?.as_str()?.to_string(),
                    url: file.get("url")?.as_str()?.to_string(),
                    sha512: file
                        .pointer("/digests/sha512")
                        .and_then(Value::as_str)
                        .and_then(hex_to_base64),
                })
            })
            .collect(),
    )
}

/// PyPI publishes hex digests; integrity checks take base64.
fn hex_to_base64(hex: &str) -> Option<String> {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    if hex.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    Some(BASE64.encode(bytes))
}

fn descriptor_from_snapshot(snapshot: &ReleaseSnapshot) -> ManifestDescriptor {
    ManifestDescriptor {
        name: snapshot.name.clone(),
        version: snapshot.version.clone(),
        artifact_urls: snapshot.files.iter().map(|f| f.url.clone()).collect(),
        ..ManifestDescriptor::default()
    }
}
