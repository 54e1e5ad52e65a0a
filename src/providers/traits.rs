//! Traits for the two remote collaborators of the authorization pipeline.
//!
//! - [`ConfigFetcher`] resolves a tenant's [`ProxyConfiguration`] from the
//!   API-management system.
//! - [`BackendClient`] performs the combined authorize+report call against
//!   the usage backend.
//!
//! Both are object-safe so the pipeline and cache hold them as
//! `Arc<dyn Trait>`; tests substitute in-memory implementations.

use std::fmt;

use async_trait::async_trait;
use reqwest::Url;

use crate::Result;
use crate::types::{BackendCredentials, Credential, ProxyConfiguration, TenantParams, UsageReport};

// ============================================================================
// Config Fetcher
// ============================================================================

/// Source of tenant proxy configurations.
///
/// Errors carrying an HTTP status should use
/// [`TollgateError::Api`](crate::TollgateError::Api); transport failures use
/// [`TollgateError::Http`](crate::TollgateError::Http).
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    /// Fetcher name for logging/debugging.
    fn name(&self) -> &str;

    /// Fetch the current configuration for `tenant`.
    async fn fetch(&self, tenant: &TenantParams) -> Result<ProxyConfiguration>;
}

// ============================================================================
// Backend Client
// ============================================================================

/// One authorize+report call.
#[derive(Debug, Clone)]
pub struct AuthRepRequest {
    /// Backend base URL, taken from the tenant's proxy configuration.
    pub endpoint: Url,
    pub credentials: BackendCredentials,
    pub service_id: String,
    pub credential: Credential,
    pub usage: UsageReport,
}

/// Backend verdict on an authorize+report call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRepResponse {
    pub success: bool,
    /// Backend-supplied reason; empty on success.
    pub reason: String,
    /// HTTP status the backend answered with.
    pub status: u16,
}

impl AuthRepResponse {
    pub fn authorized(status: u16) -> Self {
        Self {
            success: true,
            reason: String::new(),
            status,
        }
    }

    pub fn denied(status: u16, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
            status,
        }
    }
}

impl fmt::Display for AuthRepResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(f, "authorized ({})", self.status)
        } else {
            write!(f, "denied ({}): {}", self.status, self.reason)
        }
    }
}

/// Client for the usage backend.
///
/// An explicit denial is a successful call returning
/// `AuthRepResponse { success: false, .. }`; `Err` is reserved for transport
/// or protocol failures.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Client name for logging/debugging.
    fn name(&self) -> &str;

    async fn authrep(&self, request: &AuthRepRequest) -> Result<AuthRepResponse>;
}
