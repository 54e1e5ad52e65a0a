//! Tenant proxy configuration: backend credentials and mapping rules.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use reqwest::Url;
use tracing::warn;

use crate::matcher;
use crate::types::UsageReport;
use crate::{Result, TollgateError};

/// How the gateway authenticates itself against the usage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthKind {
    ServiceToken,
    ProviderKey,
}

impl AuthKind {
    /// Query parameter name the backend expects the secret under.
    pub fn as_param(&self) -> &'static str {
        match self {
            AuthKind::ServiceToken => "service_token",
            AuthKind::ProviderKey => "provider_key",
        }
    }
}

impl FromStr for AuthKind {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "service_token" => Ok(AuthKind::ServiceToken),
            "provider_key" => Ok(AuthKind::ProviderKey),
            other => Err(TollgateError::UnsupportedAuthKind(other.to_string())),
        }
    }
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

/// Backend authentication as declared by the remote system, unvalidated.
///
/// The kind stays a string until
/// [`ProxyConfiguration::backend_credentials`] validates it, so an
/// unsupported kind is reported at authorization time.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendAuth {
    pub kind: String,
    pub value: String,
}

impl fmt::Debug for BackendAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendAuth")
            .field("kind", &self.kind)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Validated backend credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendCredentials {
    pub kind: AuthKind,
    pub value: String,
}

impl fmt::Debug for BackendCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendCredentials")
            .field("kind", &self.kind)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Converts a matching request into metered usage.
///
/// The pattern is compiled once on construction. A pattern the regex engine
/// rejects is logged and the rule never matches.
#[derive(Clone)]
pub struct MappingRule {
    pub pattern: String,
    pub http_method: String,
    pub metric: String,
    pub delta: u64,
    compiled: Option<Regex>,
}

impl MappingRule {
    pub fn new(
        pattern: impl Into<String>,
        http_method: impl Into<String>,
        metric: impl Into<String>,
        delta: u64,
    ) -> Self {
        let pattern = pattern.into();
        let compiled = match Regex::new(&pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "mapping rule pattern does not compile, rule disabled");
                None
            }
        };
        Self {
            pattern,
            http_method: http_method.into(),
            metric: metric.into(),
            delta,
            compiled,
        }
    }

    /// Whether the rule applies to `method` and `path`.
    ///
    /// The pattern matches anywhere in the path (not anchored); the method
    /// comparison ignores ASCII case.
    pub fn matches(&self, method: &str, path: &str) -> bool {
        self.http_method.eq_ignore_ascii_case(method)
            && self.compiled.as_ref().is_some_and(|re| re.is_match(path))
    }

    /// Whether the pattern compiled.
    pub fn is_valid(&self) -> bool {
        self.compiled.is_some()
    }
}

impl PartialEq for MappingRule {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
            && self.http_method == other.http_method
            && self.metric == other.metric
            && self.delta == other.delta
    }
}

impl Eq for MappingRule {}

impl fmt::Debug for MappingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingRule")
            .field("pattern", &self.pattern)
            .field("http_method", &self.http_method)
            .field("metric", &self.metric)
            .field("delta", &self.delta)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl fmt::Display for MappingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} +{}",
            self.http_method.to_ascii_uppercase(),
            self.pattern,
            self.metric,
            self.delta
        )
    }
}

/// Immutable snapshot of a tenant's proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfiguration {
    pub service_id: String,
    pub backend_endpoint: String,
    pub backend_auth: BackendAuth,
    rules: Vec<MappingRule>,
}

impl ProxyConfiguration {
    pub fn new(
        service_id: impl Into<String>,
        backend_endpoint: impl Into<String>,
        backend_auth: BackendAuth,
        rules: Vec<MappingRule>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            backend_endpoint: backend_endpoint.into(),
            backend_auth,
            rules,
        }
    }

    /// Mapping rules in the order the remote system declared them.
    pub fn rules(&self) -> &[MappingRule] {
        &self.rules
    }

    /// Usage a request would be metered for under this configuration.
    pub fn usage_for(&self, method: &str, path: &str) -> UsageReport {
        matcher::match_rules(&self.rules, method, path)
    }

    /// Validate the declared backend authentication.
    pub fn backend_credentials(&self) -> Result<BackendCredentials> {
        Ok(BackendCredentials {
            kind: self.backend_auth.kind.parse()?,
            value: self.backend_auth.value.clone(),
        })
    }

    /// Parse the backend endpoint.
    pub fn backend_url(&self) -> Result<Url> {
        let url = Url::parse(&self.backend_endpoint).map_err(|e| {
            TollgateError::InvalidBackendEndpoint {
                url: self.backend_endpoint.clone(),
                reason: e.to_string(),
            }
        })?;
        if url.cannot_be_a_base() {
            return Err(TollgateError::InvalidBackendEndpoint {
                url: self.backend_endpoint.clone(),
                reason: "not a base URL".to_string(),
            });
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: &str, endpoint: &str) -> ProxyConfiguration {
        ProxyConfiguration::new(
            "42",
            endpoint,
            BackendAuth {
                kind: kind.into(),
                value: "secret".into(),
            },
            vec![],
        )
    }

    #[test]
    fn known_auth_kinds_parse() {
        let creds = config("service_token", "https://su1.example.net")
            .backend_credentials()
            .unwrap();
        assert_eq!(creds.kind, AuthKind::ServiceToken);

        let creds = config("provider_key", "https://su1.example.net")
            .backend_credentials()
            .unwrap();
        assert_eq!(creds.kind, AuthKind::ProviderKey);
    }

    #[test]
    fn unknown_auth_kind_is_rejected() {
        let err = config("oauth", "https://su1.example.net")
            .backend_credentials()
            .unwrap_err();
        assert_eq!(err, TollgateError::UnsupportedAuthKind("oauth".into()));
    }

    #[test]
    fn backend_url_must_parse() {
        assert!(config("service_token", "https://su1.example.net").backend_url().is_ok());
        assert!(matches!(
            config("service_token", "not a url").backend_url(),
            Err(TollgateError::InvalidBackendEndpoint { .. })
        ));
        assert!(matches!(
            config("service_token", "mailto:ops@example.com").backend_url(),
            Err(TollgateError::InvalidBackendEndpoint { .. })
        ));
    }

    #[test]
    fn invalid_pattern_disables_rule() {
        let rule = MappingRule::new("/foo(", "GET", "hits", 1);
        assert!(!rule.is_valid());
        assert!(!rule.matches("GET", "/foo("));
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let rendered = format!("{:?}", config("service_token", "https://su1.example.net"));
        assert!(!rendered.contains("secret\""));
        assert!(rendered.contains("<redacted>"));
    }
}
