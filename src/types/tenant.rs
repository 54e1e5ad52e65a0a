//! Tenant identity and credentials.

use std::fmt;

use reqwest::Url;

use crate::{Result, TollgateError};

/// Cache key for a tenant, derived from `(system URL, service id)`.
///
/// Two requests for the same tenant always produce equal keys; the access
/// token is not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantKey(String);

impl TenantKey {
    pub fn new(system_url: &str, service_id: &str) -> Self {
        Self(format!("{system_url}_{service_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to fetch a tenant's proxy configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct TenantParams {
    /// Base URL of the API-management system (admin portal).
    pub system_url: String,
    /// Service identifier within that system.
    pub service_id: String,
    /// Access token for the system's admin API.
    pub access_token: String,
}

impl TenantParams {
    pub fn new(
        system_url: impl Into<String>,
        service_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            system_url: system_url.into(),
            service_id: service_id.into(),
            access_token: access_token.into(),
        }
    }

    pub fn key(&self) -> TenantKey {
        TenantKey::new(&self.system_url, &self.service_id)
    }

    /// Parse the system URL, rejecting anything that is not an absolute
    /// http(s) URL.
    pub fn parsed_system_url(&self) -> Result<Url> {
        let invalid = |reason: String| TollgateError::InvalidSystemUrl {
            url: self.system_url.clone(),
            reason,
        };
        let url = Url::parse(&self.system_url).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(format!("unsupported scheme '{other}'"))),
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(url)
    }
}

impl fmt::Debug for TenantParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantParams")
            .field("system_url", &self.system_url)
            .field("service_id", &self.service_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}
