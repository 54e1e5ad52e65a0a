//! Tollgate - request authorization against an API-management backend
//!
//! For every inbound request Tollgate decides whether it may proceed. It
//! resolves the tenant's proxy configuration (cached, with background flush
//! and refresh), matches the request against the configured mapping rules
//! to compute a usage report, and asks the usage backend to authorize and
//! report that usage in one call.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tollgate::{AuthorizationRequest, CacheConfig, TenantParams, Tollgate};
//!
//! #[tokio::main]
//! async fn main() -> tollgate::Result<()> {
//!     let authorizer = Tollgate::builder()
//!         .cache(CacheConfig::new().ttl(Duration::from_secs(300)))
//!         .build()?;
//!     authorizer.start_cache_workers()?;
//!
//!     let tenant = TenantParams::new("https://acme-admin.example.com", "42", "token");
//!     let request = AuthorizationRequest::new("GET", "/orders?page=2").user_key("my-key");
//!
//!     let result = authorizer.authorize(&tenant, &request).await;
//!     println!("{} ({}): {}", result.status, result.status.rpc_code(), result.message);
//!
//!     authorizer.stop_cache_workers().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod matcher;
pub mod providers;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use cache::{CacheConfig, MissStrategy, ProxyConfigCache};
pub use config::Config;
pub use error::{Result, TollgateError, WorkerKind};
pub use gateway::{Authorizer, AuthorizerBuilder, Tollgate};
pub use version::{PKG_VERSION, version_string};

// Re-export all types
pub use types::{
    AuthKind, AuthStatus, AuthorizationRequest, AuthorizationResult, BackendAuth,
    BackendCredentials, Credential, Decision, MappingRule, ProxyConfiguration, TenantKey,
    TenantParams, UsageReport,
};
