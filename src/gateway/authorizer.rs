//! Authorizer - the per-request decision pipeline
//!
//! ```text
//! Received → ValidateInput → ResolveConfiguration → MatchRules → CallBackend → Decided
//! ```
//!
//! The first failing step decides the outcome; nothing is retried within
//! one evaluation. Every branch yields an [`AuthorizationResult`], never an
//! error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use crate::cache::{ProxyConfigCache, RefetchParams};
use crate::providers::{
    AuthRepRequest, AuthRepResponse, BackendClient, ConfigFetcher, fetch_recorded, outcome_code,
};
use crate::telemetry;
use crate::types::{
    AuthStatus, AuthorizationRequest, AuthorizationResult, Credential, ProxyConfiguration,
    TenantParams, UsageReport,
};
use crate::{Result, TollgateError};

/// Authorization pipeline bound to one fetcher, backend client and
/// (optionally) one configuration cache.
///
/// Cheap to share: wrap in an `Arc` and call [`authorize`](Self::authorize)
/// from any number of tasks.
pub struct Authorizer {
    fetcher: Arc<dyn ConfigFetcher>,
    backend: Arc<dyn BackendClient>,
    cache: Option<Arc<ProxyConfigCache>>,
    result_validity: Option<Duration>,
}

impl Authorizer {
    pub(crate) fn new(
        fetcher: Arc<dyn ConfigFetcher>,
        backend: Arc<dyn BackendClient>,
        cache: Option<Arc<ProxyConfigCache>>,
        result_validity: Option<Duration>,
    ) -> Self {
        Self {
            fetcher,
            backend,
            cache,
            result_validity,
        }
    }

    /// The configuration cache, if caching is enabled.
    pub fn cache(&self) -> Option<&Arc<ProxyConfigCache>> {
        self.cache.as_ref()
    }

    /// Start the cache's flush and refresh loops. No-op without a cache.
    pub fn start_cache_workers(&self) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.start_flush_worker()?;
            if let Err(e) = cache.start_refresh_worker() {
                warn!(error = %e, "refresh worker failed to start");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stop both cache loops. No-op without a cache.
    pub async fn stop_cache_workers(&self) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.stop_flush_worker().await?;
            cache.stop_refresh_worker().await?;
        }
        Ok(())
    }

    /// Decide whether `request` may proceed for `tenant`.
    #[instrument(skip_all, fields(tenant = %tenant.key(), method = %request.method))]
    pub async fn authorize(
        &self,
        tenant: &TenantParams,
        request: &AuthorizationRequest,
    ) -> AuthorizationResult {
        telemetry::increment_total_requests();
        let result = self.evaluate(tenant, request).await;
        debug!(status = %result.status, code = result.status.rpc_code(), "authorization decided");
        result
    }

    async fn evaluate(
        &self,
        tenant: &TenantParams,
        request: &AuthorizationRequest,
    ) -> AuthorizationResult {
        // ValidateInput
        let Some(credential) = request.present_credential() else {
            return AuthorizationResult::new(AuthStatus::DeniedNoCredential, "credential required");
        };
        if request.path.is_empty() {
            return AuthorizationResult::new(AuthStatus::DeniedMissingPath, "missing request path");
        }
        if let Err(e) = tenant.parsed_system_url() {
            return AuthorizationResult::new(AuthStatus::InvalidUpstreamConfig, e.to_string());
        }

        // ResolveConfiguration
        let config = match self.resolve_configuration(tenant).await {
            Ok(config) => config,
            Err(e) if e.is_upstream_config() => {
                return AuthorizationResult::new(AuthStatus::InvalidUpstreamConfig, e.to_string());
            }
            Err(e) => {
                warn!(error = %e, "proxy configuration unavailable");
                return AuthorizationResult::new(
                    AuthStatus::ConfigUnavailable,
                    format!("failed to resolve proxy configuration: {e}"),
                );
            }
        };

        // MatchRules
        let usage = config.usage_for(&request.method, &request.path);
        if usage.is_empty() {
            return AuthorizationResult::new(
                AuthStatus::DeniedNoMatchingRule,
                format!(
                    "no matching mapping rule for request with method {} and path {}",
                    request.method, request.path
                ),
            );
        }

        // CallBackend
        let authrep = match backend_request(&config, credential.clone(), usage.clone()) {
            Ok(authrep) => authrep,
            Err(e) => {
                return AuthorizationResult::new(AuthStatus::InvalidUpstreamConfig, e.to_string());
            }
        };
        match self.call_backend(tenant, &authrep).await {
            Ok(verdict) if verdict.success => {
                AuthorizationResult::allowed(usage, self.result_validity)
            }
            Ok(verdict) => {
                AuthorizationResult::new(AuthStatus::DeniedByBackend, verdict.reason)
                    .with_usage(usage)
            }
            Err(e) => {
                warn!(error = %e, "backend call failed");
                AuthorizationResult::new(
                    AuthStatus::BackendUnavailable,
                    format!("backend call failed: {e}"),
                )
                .with_usage(usage)
            }
        }
    }

    async fn resolve_configuration(
        &self,
        tenant: &TenantParams,
    ) -> Result<Arc<ProxyConfiguration>> {
        match &self.cache {
            Some(cache) => {
                let refetch = RefetchParams::new(tenant.clone(), Arc::clone(&self.fetcher));
                cache.get(&tenant.key(), refetch).await
            }
            None => fetch_recorded(self.fetcher.as_ref(), tenant)
                .await
                .map(Arc::new),
        }
    }

    async fn call_backend(
        &self,
        tenant: &TenantParams,
        request: &AuthRepRequest,
    ) -> Result<AuthRepResponse> {
        let target = tenant.key();
        let start = Instant::now();
        let result = self.backend.authrep(request).await;
        telemetry::report_latency(telemetry::ENDPOINT_BACKEND, target.as_str(), start.elapsed());
        let code = match &result {
            Ok(verdict) => verdict.status,
            Err(_) => outcome_code(&result),
        };
        telemetry::report_outcome(telemetry::ENDPOINT_BACKEND, target.as_str(), code);
        result
    }
}

/// Assemble the backend call, validating the upstream-declared credentials
/// and endpoint.
fn backend_request(
    config: &ProxyConfiguration,
    credential: Credential,
    usage: UsageReport,
) -> Result<AuthRepRequest> {
    let credentials = config.backend_credentials()?;
    let endpoint = config.backend_url()?;
    if credentials.value.is_empty() {
        return Err(TollgateError::UnsupportedAuthKind(format!(
            "{} without a value",
            credentials.kind
        )));
    }
    Ok(AuthRepRequest {
        endpoint,
        credentials,
        service_id: config.service_id.clone(),
        credential,
        usage,
    })
}
