//! Builder for configuring authorizer instances

use std::sync::Arc;
use std::time::Duration;

use super::Authorizer;
use crate::Result;
use crate::cache::{CacheConfig, Clock, ProxyConfigCache, SystemClock};
use crate::providers::{BackendClient, ConfigFetcher, HttpBackendClient, SystemClient};

/// Default timeout for the built-in HTTP clients.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Main entry point for creating authorizer instances.
pub struct Tollgate;

impl Tollgate {
    /// Create a new builder for configuring the authorizer.
    pub fn builder() -> AuthorizerBuilder {
        AuthorizerBuilder::new()
    }
}

/// Builder for configuring authorizer instances.
///
/// Without explicit collaborators the builder wires the HTTP
/// [`SystemClient`] and [`HttpBackendClient`]. Caching is on by default.
///
/// ```rust,no_run
/// # use tollgate::{Tollgate, CacheConfig};
/// # use std::time::Duration;
/// # fn main() -> tollgate::Result<()> {
/// let authorizer = Tollgate::builder()
///     .cache(CacheConfig::new().ttl(Duration::from_secs(120)))
///     .result_validity(Duration::from_secs(5))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct AuthorizerBuilder {
    fetcher: Option<Arc<dyn ConfigFetcher>>,
    backend: Option<Arc<dyn BackendClient>>,
    cache: Option<CacheConfig>,
    clock: Option<Arc<dyn Clock>>,
    result_validity: Option<Duration>,
    timeout: Option<Duration>,
    environment: Option<String>,
}

impl AuthorizerBuilder {
    pub fn new() -> Self {
        Self {
            fetcher: None,
            backend: None,
            cache: Some(CacheConfig::default()),
            clock: None,
            result_validity: None,
            timeout: None,
            environment: None,
        }
    }

    /// Use a custom configuration source instead of the HTTP system client.
    pub fn fetcher(mut self, fetcher: Arc<dyn ConfigFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Use a custom backend client instead of the HTTP one.
    pub fn backend(mut self, backend: Arc<dyn BackendClient>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Configure the proxy configuration cache.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    /// Fetch the configuration on every request instead of caching it.
    pub fn disable_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    /// Clock used for cache expiry (default: system clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// How long hosts may reuse an `Allowed` result.
    pub fn result_validity(mut self, validity: Duration) -> Self {
        self.result_validity = Some(validity);
        self
    }

    /// Request timeout for the built-in HTTP clients.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Deployment environment the built-in system client fetches.
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Build the authorizer.
    pub fn build(self) -> Result<Authorizer> {
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let fetcher: Arc<dyn ConfigFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => {
                let mut client = SystemClient::with_timeout(timeout)?;
                if let Some(environment) = self.environment {
                    client = client.environment(environment);
                }
                Arc::new(client)
            }
        };

        let backend: Arc<dyn BackendClient> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpBackendClient::with_timeout(timeout)?),
        };

        let cache = match self.cache {
            Some(config) => {
                config.validate()?;
                let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
                Some(Arc::new(ProxyConfigCache::with_clock(config, clock)))
            }
            None => None,
        };

        Ok(Authorizer::new(fetcher, backend, cache, self.result_validity))
    }
}

impl Default for AuthorizerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
