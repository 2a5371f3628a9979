//! Package identity, naming and version constraint types.
//!
//! # Overview
//!
//! - **FetchRequest**: a top-level module the caller asked for
//! - **ManifestDescriptor**: resolved metadata for one concrete version
//! - **MaterializedModule**: what a provider wrote to storage
//! - **VersionConstraint**: npm-style range parsed into `semver` requirements
//! - **PackageFile**: the requests a local `package.json` asks for
//!
//! # Fetch Root Layout
//!
//! ```text
//! /                                   fetch root
//! └── left-pad-1.3.0/                 one folder per top-level request
//!     ├── left-pad-1.3.0.tgz          payload
//!     ├── wordwrap-0.0.3.tgz          dependency payloads, flat
//!     └── packages/
//!         ├── left-pad-1.3.0.json     manifest snapshots
//!         └── wordwrap-0.0.3.json
//! ```

mod constraint;
mod naming;
mod package_file;
mod types;

pub use constraint::{is_source_control, parse_version, ConstraintError, VersionConstraint};
pub use naming::{
    escape_name, is_types_companion, manifest_file_name, payload_file_name, request_dir_name,
    split_versioned_file_name, types_companion_name, unescape_name, MANIFEST_EXTENSION,
    PACKAGES_DIR, PAYLOAD_EXTENSION,
};
pub use package_file::{PackageFile, PackageFileError};
pub use types::{Dependency, FetchRequest, ManifestDescriptor, MaterializedModule};
