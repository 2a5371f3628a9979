//! Package registry provider abstraction
//!
//! Each supported ecosystem implements [`PackageProvider`]: resolving a name
//! and constraint to one concrete version, materializing the manifest and
//! payload into storage, and detecting modules that are already present.
//!
//! # Factory Pattern
//!
//! Providers are built per walk by the [`ProviderFactory`]:
//!
//! ```ignore
//! use depclone::provider::{ClientConfig, Ecosystem, ProviderFactory, ReqwestClient};
//!
//! let config = ClientConfig::default();
//! let client = Arc::new(ReqwestClient::new(&config)?);
//! let factory = ProviderFactory::new(client, config);
//! let provider = factory.create(Ecosystem::Npm, storage, events, 2 * 1024 * 1024);
//! ```

mod documents;
mod download;
mod factory;
mod http;
mod npm;
mod pypi;
mod resolve;
mod types;

pub use factory::{Ecosystem, ProviderFactory, UnsupportedEcosystem};
pub use http::{
    default_user_agent, AsyncHttpClient, ClientConfig, PayloadResponse, ReqwestClient,
    DEFAULT_TIMEOUT_SECS, NPM_REGISTRY_URL, PYPI_REGISTRY_URL,
};
pub use npm::NpmProvider;
pub use pypi::PypiProvider;
pub use types::{PackageProvider, ProviderContext, ProviderError, ProviderResult};

#[cfg(test)]
pub use http::tests::MockAsyncHttpClient;
