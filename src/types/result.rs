//! Authorization outcomes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::UsageReport;

/// Coarse decision class of an authorization outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
    Unavailable,
    InvalidInput,
}

/// Stable status taxonomy returned to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Allowed,
    DeniedNoCredential,
    DeniedMissingPath,
    DeniedNoMatchingRule,
    DeniedByBackend,
    ConfigUnavailable,
    BackendUnavailable,
    InvalidUpstreamConfig,
}

impl AuthStatus {
    pub fn decision(&self) -> Decision {
        match self {
            AuthStatus::Allowed => Decision::Allow,
            AuthStatus::DeniedNoCredential | AuthStatus::DeniedMissingPath => {
                Decision::InvalidInput
            }
            AuthStatus::DeniedNoMatchingRule | AuthStatus::DeniedByBackend => Decision::Deny,
            AuthStatus::ConfigUnavailable
            | AuthStatus::BackendUnavailable
            | AuthStatus::InvalidUpstreamConfig => Decision::Unavailable,
        }
    }

    /// google.rpc status code the host transport reports.
    pub fn rpc_code(&self) -> i32 {
        match self {
            AuthStatus::Allowed => 0,
            AuthStatus::DeniedNoCredential => 16,
            AuthStatus::DeniedMissingPath | AuthStatus::InvalidUpstreamConfig => 3,
            AuthStatus::DeniedNoMatchingRule | AuthStatus::DeniedByBackend => 7,
            AuthStatus::ConfigUnavailable | AuthStatus::BackendUnavailable => 14,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthStatus::Allowed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStatus::Allowed => "allowed",
            AuthStatus::DeniedNoCredential => "denied_no_credential",
            AuthStatus::DeniedMissingPath => "denied_missing_path",
            AuthStatus::DeniedNoMatchingRule => "denied_no_matching_rule",
            AuthStatus::DeniedByBackend => "denied_by_backend",
            AuthStatus::ConfigUnavailable => "config_unavailable",
            AuthStatus::BackendUnavailable => "backend_unavailable",
            AuthStatus::InvalidUpstreamConfig => "invalid_upstream_config",
        }
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one authorization evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResult {
    pub status: AuthStatus,
    pub message: String,
    /// How long the host may reuse this result. Only set on `Allowed`.
    pub valid_for: Option<Duration>,
    /// Usage sent to the backend, when a backend call was made.
    pub usage: Option<UsageReport>,
}

impl AuthorizationResult {
    pub fn new(status: AuthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            valid_for: None,
            usage: None,
        }
    }

    pub fn allowed(usage: UsageReport, valid_for: Option<Duration>) -> Self {
        Self {
            status: AuthStatus::Allowed,
            message: String::new(),
            valid_for,
            usage: Some(usage),
        }
    }

    pub fn with_usage(mut self, usage: UsageReport) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn decision(&self) -> Decision {
        self.status.decision()
    }

    pub fn is_allowed(&self) -> bool {
        self.status.is_allowed()
    }
}
