//! Provider selection by ecosystem.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::http::{AsyncHttpClient, ClientConfig};
use super::npm::NpmProvider;
use super::pypi::PypiProvider;
use super::types::{PackageProvider, ProviderContext};
use crate::events::EventSink;
use crate::storage::Storage;

/// Supported registry ecosystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Ecosystem {
    #[default]
    Npm,
    Pypi,
}

impl Ecosystem {
    /// All supported ecosystems.
    pub const ALL: [Ecosystem; 2] = [Ecosystem::Npm, Ecosystem::Pypi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "npm",
            Ecosystem::Pypi => "pypi",
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// No provider exists for the named ecosystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported ecosystem '{0}' (supported: npm, pypi)")]
pub struct UnsupportedEcosystem(pub String);

impl FromStr for Ecosystem {
    type Err = UnsupportedEcosystem;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "npm" => Ok(Ecosystem::Npm),
            "pypi" | "pip" => Ok(Ecosystem::Pypi),
            _ => Err(UnsupportedEcosystem(s.to_string())),
        }
    }
}

/// Creates providers for one walk.
///
/// Holds the shared HTTP client and its configuration; each call to
/// [`ProviderFactory::create`] builds a fresh provider bound to a walk's
/// storage and event sink.
#[derive(Clone)]
pub struct ProviderFactory {
    client: Arc<dyn AsyncHttpClient>,
    config: ClientConfig,
}

impl ProviderFactory {
    pub fn new(client: Arc<dyn AsyncHttpClient>, config: ClientConfig) -> Self {
        Self { client, config }
    }

    /// Build the provider for `ecosystem`.
    pub fn create(
        &self,
        ecosystem: Ecosystem,
        storage: Arc<dyn Storage>,
        events: EventSink,
        progress_threshold: u64,
    ) -> Arc<dyn PackageProvider> {
        debug!(%ecosystem, backend = storage.backend_name(), "Creating provider");
        let ctx = ProviderContext {
            storage,
            events,
            client: Arc::clone(&self.client),
            config: self.config.clone(),
            progress_threshold,
        };
        match ecosystem {
            Ecosystem::Npm => Arc::new(NpmProvider::new(ctx)),
            Ecosystem::Pypi => Arc::new(PypiProvider::new(ctx)),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::events::channel;
    use crate::provider::http::tests::MockAsyncHttpClient;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_parse_ecosystem() {
        assert_eq!("npm".parse::<Ecosystem>().unwrap(), Ecosystem::Npm);
        assert_eq!(" PyPI ".parse::<Ecosystem>().unwrap(), Ecosystem::Pypi);
        assert_eq!(
            "cargo".parse::<Ecosystem>().unwrap_err(),
            UnsupportedEcosystem("cargo".to_string())
        );
    }

    #[test]
    fn test_display_roundtrips() {
        for ecosystem in Ecosystem::ALL {
            assert_eq!(ecosystem.to_string().parse::<Ecosystem>().unwrap(), ecosystem);
        }
    }

    #[test]
    fn test_factory_creates_matching_provider() {
        let factory = ProviderFactory::new(
            Arc::new(MockAsyncHttpClient::new()),
            ClientConfig::default(),
        );
        let (events, _stream) = channel(CancellationToken::new());

        for ecosystem in Ecosystem::ALL {
            let provider = factory.create(
                ecosystem,
                Arc::new(MemoryStorage::new()),
                events.clone(),
                0,
            );
            assert_eq!(provider.name(), ecosystem.as_str());
        }
    }
}
