//! Remote collaborators: the configuration source and the usage backend.
//!
//! [`SystemClient`] and [`HttpBackendClient`] are the HTTP implementations
//! used in production. Anything implementing [`ConfigFetcher`] or
//! [`BackendClient`] can be plugged into the
//! [`AuthorizerBuilder`](crate::AuthorizerBuilder) instead.

pub mod backend;
pub mod system;
pub mod traits;

pub use backend::HttpBackendClient;
pub use system::SystemClient;
pub use traits::{AuthRepRequest, AuthRepResponse, BackendClient, ConfigFetcher};

use std::time::Instant;

use crate::telemetry;
use crate::types::{ProxyConfiguration, TenantParams};
use crate::{Result, TollgateError};

/// Status code reported for a finished remote call.
///
/// `200` on success, the HTTP status for API errors, `0` when no status
/// was received.
pub(crate) fn outcome_code<T>(result: &Result<T>) -> u16 {
    match result {
        Ok(_) => 200,
        Err(TollgateError::Api { status, .. }) => *status,
        Err(_) => 0,
    }
}

/// Fetch a configuration and report latency and outcome for the call.
pub(crate) async fn fetch_recorded(
    fetcher: &dyn ConfigFetcher,
    tenant: &TenantParams,
) -> Result<ProxyConfiguration> {
    let target = tenant.key();
    let start = Instant::now();
    let result = fetcher.fetch(tenant).await;
    telemetry::report_latency(telemetry::ENDPOINT_SYSTEM, target.as_str(), start.elapsed());
    telemetry::report_outcome(
        telemetry::ENDPOINT_SYSTEM,
        target.as_str(),
        outcome_code(&result),
    );
    result
}
