//! npm registry provider.
//!
//! # Registry protocol
//!
//! - `GET {npm_url}/{escaped-name}` returns the packument: a `versions` map
//!   of version to version object, plus a `dist-tags` map
//! - `versions[v].dist.tarball` is the payload URL
//! - `versions[v].dist.integrity` (optional) is an SRI digest of the payload
//!
//! # Layout
//!
//! For `@babel/core@7.24.0` under destination `D`:
//!
//! ```text
//! D/@babel%2fcore-7.24.0.tgz
//! D/packages/@babel%2fcore-7.24.0.json    the version object, pretty-printed
//! ```
//!
//! The auxiliary artifact is the DefinitelyTyped companion (`@types/...`),
//! resolved with `~major.minor` of the primary version.

use std::collections::HashMap;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::documents::DocumentCache;
use super::download::{download_to_storage, ArtifactLabel, Integrity};
use super::resolve::VersionListing;
use super::types::{PackageProvider, ProviderContext, ProviderError, ProviderResult};
use crate::package::{
    manifest_file_name, parse_version, payload_file_name, split_versioned_file_name,
    types_companion_name, unescape_name, Dependency, ManifestDescriptor, MaterializedModule,
    VersionConstraint, PACKAGES_DIR, PAYLOAD_EXTENSION,
};
use crate::storage::BoxFuture;

/// npm registry provider.
pub struct NpmProvider {
    ctx: ProviderContext,
    documents: DocumentCache,
}

impl NpmProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        let documents = DocumentCache::new(ctx.client.clone());
        Self { ctx, documents }
    }

    fn document_url(&self, escaped: &str) -> String {
        format!("{}/{}", self.ctx.config.npm_url.trim_end_matches('/'), escaped)
    }

    async fn packument(&self, escaped: &str) -> ProviderResult<std::sync::Arc<Value>> {
        self.documents
            .fetch(&self.document_url(escaped), &unescape_name(escaped))
            .await
    }

    async fn resolve(&self, escaped: &str, constraint: &VersionConstraint) -> ProviderResult<String> {
        let display_name = unescape_name(escaped);
        let packument = self.packument(escaped).await?;
        listing_from_packument(&packument).select(&display_name, constraint, &self.ctx.events)
    }

    async fn fetch(
        &self,
        escaped: &str,
        version: &str,
        destination: &Path,
    ) -> ProviderResult<MaterializedModule> {
        let display_name = unescape_name(escaped);
        let packument = self.packument(escaped).await?;
        let version_object = packument
            .get("versions")
            .and_then(|versions| versions.get(version))
            .ok_or_else(|| ProviderError::NoMatchingVersion {
                name: display_name.clone(),
                constraint: version.to_string(),
            })?;

        let manifest = descriptor_from_version_object(&display_name, version, version_object);
        let tarball = manifest
            .artifact_urls
            .first()
            .ok_or_else(|| ProviderError::InvalidDocument {
                name: display_name.clone(),
                reason: format!("version {} has no dist.tarball", version),
            })?
            .clone();
        let integrity = version_object
            .pointer("/dist/integrity")
            .and_then(Value::as_str)
            .and_then(Integrity::parse);

        let storage = &self.ctx.storage;
        let packages_dir = destination.join(PACKAGES_DIR);
        storage.mkdir(&packages_dir).await?;

        self.ctx
            .events
            .info(format!("downloading tarball of {}-{}", display_name, version));
        let payload_path = destination.join(payload_file_name(escaped, version));
        download_to_storage(
            &self.ctx,
            &tarball,
            &payload_path,
            integrity.as_ref(),
            ArtifactLabel {
                name: &display_name,
                version,
            },
        )
        .await?;

        // The snapshot is written after the payload is durable, so a readable
        // snapshot always has a complete payload beside it
        let manifest_path = packages_dir.join(manifest_file_name(escaped, version));
        let snapshot = serde_json::to_vec_pretty(version_object).map_err(|e| {
            ProviderError::InvalidDocument {
                name: display_name.clone(),
                reason: e.to_string(),
            }
        })?;
        storage.write_file(&manifest_path, snapshot).await?;

        info!(module = %display_name, version, "Module materialized");
        self.ctx.events.success(format!("done cloning {}", display_name));

        Ok(MaterializedModule {
            directory: destination.to_path_buf(),
            payloads: vec![payload_path],
            manifest_path,
            manifest,
        })
    }

    async fn present(
        &self,
        escaped: &str,
        constraint: &VersionConstraint,
        destination: &Path,
    ) -> ProviderResult<bool> {
        let entries = match self.ctx.storage.read_dir(destination).await {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        Ok(entries
            .iter()
            .filter_map(|entry| split_versioned_file_name(entry, PAYLOAD_EXTENSION))
            .filter(|(name, _)| *name == escaped)
            .any(|(_, version)| constraint.is_unconstrained() || constraint.matches_str(version)))
    }

    async fn read_snapshot(&self, module: &MaterializedModule) -> ProviderResult<ManifestDescriptor> {
        let bytes = self.ctx.storage.read_file(&module.manifest_path).await?;
        let display_name = module.manifest.name.as_str();
        let version_object: Value =
            serde_json::from_slice(&bytes).map_err(|e| ProviderError::InvalidDocument {
                name: display_name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(descriptor_from_version_object(
            display_name,
            &module.manifest.version,
            &version_object,
        ))
    }

    async fn fetch_types(
        &self,
        escaped: &str,
        version: &str,
        destination: &Path,
    ) -> ProviderResult<Option<MaterializedModule>> {
        let Some(companion) = types_companion_name(escaped) else {
            return Ok(None);
        };

        let constraint = match parse_version(version) {
            Some(v) => VersionConstraint::parse(&format!("~{}.{}", v.major, v.minor))?,
            None => VersionConstraint::any(),
        };
        debug!(module = %unescape_name(escaped), companion = %companion, %constraint, "Fetching type declarations");

        let companion_version = self.resolve(&companion, &constraint).await?;
        let module = self.fetch(&companion, &companion_version, destination).await?;
        Ok(Some(module))
    }
}

impl PackageProvider for NpmProvider {
    fn name(&self) -> &str {
        "npm"
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

    fn auxiliary_name(&self, name: &str) -> Option<String> {
        types_companion_name(name)
    }

    fn fetch_auxiliary_artifact<'a>(
        &'a self,
        name: &'a str,
        version: &'a str,
        destination: &'a Path,
    ) -> BoxFuture<'a, ProviderResult<Option<MaterializedModule>>> {
        Box::pin(self.fetch_types(name, version, destination))
    }
}

/// Build the version listing from a packument.
fn listing_from_packument(packument: &Value) -> VersionListing {
    let listed = packument
        .get("versions")
        .and_then(Value::as_object)
        .map(|versions| versions.keys().cloned().collect())
        .unwrap_or_default();

    let tags: HashMap<String, String> = packument
        .get("dist-tags")
        .and_then(Value::as_object)
        .map(|tags| {
            tags.iter()
                .filter_map(|(tag, version)| {
                    version.as_str().map(|v| (tag.clone(), v.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    VersionListing { listed, tags }
}

/// Build a descriptor from one `versions[v]` object.
fn descriptor_from_version_object(name: &str, version: &str, object: &Value) -> ManifestDescriptor {
    ManifestDescriptor {
        name: name.to_string(),
        version: version.to_string(),
        dependencies: dependency_list(object.get("dependencies")),
        dev_dependencies: dependency_list(object.get("devDependencies")),
        artifact_urls: object
            .pointer("/dist/tarball")
            .and_then(Value::as_str)
            .map(|url| vec![url.to_string()])
            .unwrap_or_default(),
    }
}

/// Dependency map in declaration order. Non-string constraints are dropped.
fn dependency_list(map: Option<&Value>) -> Vec<Dependency> {
    map.and_then(Value::as_object)
        .map(|map: &Map<String, Value>| {
            map.iter()
                .filter_map(|(name, constraint)| {
                    constraint
                        .as_str()
                        .map(|constraint| Dependency::new(name.clone(), constraint))
                })
                .collect()
        })
        .unwrap_or_default()
}
