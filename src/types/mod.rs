//! Public types for the Tollgate API.

mod proxy;
mod request;
mod result;
mod tenant;
mod usage;

pub use proxy::{AuthKind, BackendAuth, BackendCredentials, MappingRule, ProxyConfiguration};
pub use request::{AuthorizationRequest, Credential};
pub use result::{AuthStatus, AuthorizationResult, Decision};
pub use tenant::{TenantKey, TenantParams};
pub use usage::UsageReport;
