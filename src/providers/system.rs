//! HTTP client for the API-management system's proxy configuration endpoint.
//!
//! Fetches `GET {system_url}/admin/api/services/{service_id}/proxy/configs/{environment}/latest.json`
//! authenticated with the tenant's access token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::traits::ConfigFetcher;
use crate::types::{BackendAuth, MappingRule, ProxyConfiguration, TenantParams};
use crate::{Result, TollgateError};

/// Default deployment environment whose configuration is fetched.
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Default request timeout for system API calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`ConfigFetcher`] backed by the system's admin API.
#[derive(Clone)]
pub struct SystemClient {
    http: Client,
    environment: String,
}

impl SystemClient {
    /// Create a client with the default timeout and environment.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TollgateError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            environment: DEFAULT_ENVIRONMENT.to_string(),
        })
    }

    /// Fetch configurations for a different environment (e.g. "staging").
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    fn config_url(&self, tenant: &TenantParams) -> Result<Url> {
        let mut url = tenant.parsed_system_url()?;
        url.path_segments_mut()
            .map_err(|()| TollgateError::InvalidSystemUrl {
                url: tenant.system_url.clone(),
                reason: "cannot be a base URL".to_string(),
            })?
            .pop_if_empty()
            .extend([
                "admin",
                "api",
                "services",
                tenant.service_id.as_str(),
                "proxy",
                "configs",
                self.environment.as_str(),
                "latest.json",
            ]);
        url.query_pairs_mut()
            .append_pair("access_token", &tenant.access_token);
        Ok(url)
    }
}

#[async_trait]
impl ConfigFetcher for SystemClient {
    fn name(&self) -> &str {
        "system"
    }

    #[instrument(name = "system.fetch", skip(self, tenant), fields(service_id = %tenant.service_id))]
    async fn fetch(&self, tenant: &TenantParams) -> Result<ProxyConfiguration> {
        let url = self.config_url(tenant)?;

        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| TollgateError::Http(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TollgateError::Api {
                status: status.as_u16(),
                message: error_message(&body)
                    .unwrap_or_else(|| format!("system API error: {status}")),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| TollgateError::Http(e.without_url().to_string()))?;
        let config = parse_proxy_config(&tenant.service_id, &body)?;
        debug!(rules = config.rules().len(), "fetched proxy configuration");
        Ok(config)
    }
}

#[derive(Deserialize)]
struct Envelope {
    proxy_config: ProxyConfigWire,
}

#[derive(Deserialize)]
struct ProxyConfigWire {
    content: ContentWire,
}

#[derive(Deserialize)]
struct ContentWire {
    #[serde(default)]
    backend_authentication_type: String,
    #[serde(default)]
    backend_authentication_value: String,
    proxy: ProxyWire,
}

#[derive(Deserialize)]
struct ProxyWire {
    backend: BackendWire,
    #[serde(default)]
    proxy_rules: Vec<ProxyRuleWire>,
}

#[derive(Deserialize)]
struct BackendWire {
    endpoint: String,
}

#[derive(Deserialize)]
struct ProxyRuleWire {
    pattern: String,
    http_method: String,
    metric_system_name: String,
    delta: u64,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Parse a `latest.json` payload into a [`ProxyConfiguration`].
///
/// Rule order is preserved. Patterns are compiled here, once per fetch.
pub fn parse_proxy_config(service_id: &str, json: &str) -> Result<ProxyConfiguration> {
    let envelope: Envelope = serde_json::from_str(json)?;
    let content = envelope.proxy_config.content;

    let rules = content
        .proxy
        .proxy_rules
        .into_iter()
        .map(|r| MappingRule::new(r.pattern, r.http_method, r.metric_system_name, r.delta))
        .collect();

    Ok(ProxyConfiguration::new(
        service_id,
        content.proxy.backend.endpoint,
        BackendAuth {
            kind: content.backend_authentication_type,
            value: content.backend_authentication_value,
        },
        rules,
    ))
}

/// Extract `{"error": "..."}` from an error body, if present.
fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|b| b.error)
        .filter(|m| !m.is_empty())
}
