//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.tollgate/config.toml` (user)
//! 3. `/etc/tollgate/config.toml` (system)
//! 4. built-in defaults
//!
//! Tenant access tokens are loaded separately with mandatory permission checks:
//! 1. `~/.tollgate/secrets.toml` (user, must be 0600)
//! 2. `/etc/tollgate/secrets.toml` (system, must be 0600)
//! 3. `TOLLGATE_ACCESS_TOKEN` environment variable

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{CacheConfig, MissStrategy};
use crate::gateway::AuthorizerBuilder;
use crate::types::TenantParams;
use crate::{Result, TollgateError};

/// Environment variable consulted when no secrets file holds a token.
pub const ACCESS_TOKEN_ENV: &str = "TOLLGATE_ACCESS_TOKEN";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub authorizer: AuthorizerSection,
    /// Named tenants, for tools that evaluate requests by tenant name.
    #[serde(default)]
    pub tenants: BTreeMap<String, TenantSection>,
}

/// Proxy configuration cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    /// Whether to cache proxy configurations at all (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Entry lifetime in seconds (default: 300).
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    /// Refresh lead time in seconds (default: 60).
    #[serde(default = "default_refresh_buffer")]
    pub refresh_buffer_secs: u64,
    /// Maximum number of cached tenants (default: 1000).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// "independent" (default) or "single_flight".
    #[serde(default)]
    pub miss_strategy: MissStrategy,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_ttl(),
            refresh_buffer_secs: default_refresh_buffer(),
            limit: default_limit(),
            miss_strategy: MissStrategy::default(),
        }
    }
}

impl From<CacheSection> for CacheConfig {
    fn from(section: CacheSection) -> Self {
        CacheConfig::new()
            .ttl(Duration::from_secs(section.ttl_secs))
            .refresh_buffer(Duration::from_secs(section.refresh_buffer_secs))
            .limit(section.limit)
            .miss_strategy(section.miss_strategy)
    }
}

fn default_true() -> bool {
    true
}

fn default_ttl() -> u64 {
    300
}

fn default_refresh_buffer() -> u64 {
    60
}

fn default_limit() -> usize {
    1_000
}

/// Settings for the built-in HTTP clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSection {
    /// Request timeout in seconds (default: 10).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Deployment environment whose configuration is fetched (default: "production").
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            environment: default_environment(),
        }
    }
}

fn default_timeout() -> u64 {
    10
}

fn default_environment() -> String {
    crate::providers::system::DEFAULT_ENVIRONMENT.to_string()
}

/// Pipeline settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorizerSection {
    /// How long hosts may reuse an allowed result, in seconds.
    #[serde(default)]
    pub result_validity_secs: Option<u64>,
}

/// A named tenant.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantSection {
    pub system_url: String,
    pub service_id: String,
}

/// Secrets configuration (tenant access tokens).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Secrets {
    #[serde(default)]
    pub tenants: BTreeMap<String, TenantSecret>,
}

/// Access token for one named tenant.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantSecret {
    pub access_token: String,
}

impl std::fmt::Debug for TenantSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantSecret")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path must exist. Without one, the first existing standard
    /// location is used, falling back to defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load and parse one file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            TollgateError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            TollgateError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.cache_config().validate()?;
        Ok(config)
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(TollgateError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".tollgate").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/tollgate/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    pub fn cache_config(&self) -> CacheConfig {
        self.cache.clone().into()
    }

    /// Apply these settings to an authorizer builder.
    pub fn apply(&self, mut builder: AuthorizerBuilder) -> AuthorizerBuilder {
        builder = if self.cache.enabled {
            builder.cache(self.cache_config())
        } else {
            builder.disable_cache()
        };
        builder = builder
            .timeout(Duration::from_secs(self.client.timeout_secs))
            .environment(self.client.environment.clone());
        if let Some(secs) = self.authorizer.result_validity_secs {
            builder = builder.result_validity(Duration::from_secs(secs));
        }
        builder
    }

    /// Resolve a named tenant, taking its access token from `secrets`.
    pub fn tenant(&self, name: &str, secrets: &Secrets) -> Result<TenantParams> {
        let section = self.tenants.get(name).ok_or_else(|| {
            TollgateError::Configuration(format!("unknown tenant '{name}'"))
        })?;
        let token = secrets.access_token(name).ok_or_else(|| {
            TollgateError::Configuration(format!(
                "no access token for tenant '{name}' (secrets file or {ACCESS_TOKEN_ENV})"
            ))
        })?;
        Ok(TenantParams::new(
            &section.system_url,
            &section.service_id,
            token,
        ))
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (tokens may come from the
    /// environment).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".tollgate").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/tollgate/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load one secrets file after checking its permissions.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            TollgateError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            TollgateError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            TollgateError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(TollgateError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Access token for a tenant, falling back to [`ACCESS_TOKEN_ENV`].
    pub fn access_token(&self, tenant: &str) -> Option<String> {
        self.tenants
            .get(tenant)
            .map(|s| s.access_token.clone())
            .or_else(|| std::env::var(ACCESS_TOKEN_ENV).ok())
            .filter(|t| !t.is_empty())
    }
}
