//! Tollgate error types

use std::fmt;

/// Which background cache worker an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    /// Removes expired entries.
    Flush,
    /// Refetches entries that are close to expiry.
    Refresh,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Flush => f.write_str("flush"),
            WorkerKind::Refresh => f.write_str("refresh"),
        }
    }
}

/// Tollgate error types
///
/// Errors are `Clone`: a coalesced fetch hands the same outcome to every
/// waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TollgateError {
    // Remote/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    // Data errors
    #[error("JSON error: {0}")]
    Json(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Upstream configuration errors
    #[error("invalid system URL '{url}': {reason}")]
    InvalidSystemUrl { url: String, reason: String },

    #[error("invalid backend endpoint '{url}': {reason}")]
    InvalidBackendEndpoint { url: String, reason: String },

    #[error("unsupported backend authentication kind: {0}")]
    UnsupportedAuthKind(String),

    // Local configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Cache lifecycle errors
    #[error("{0} worker is already running")]
    WorkerAlreadyRunning(WorkerKind),

    #[error("{0} worker is not running")]
    WorkerNotRunning(WorkerKind),
}

impl TollgateError {
    /// Whether this error stems from data the remote system handed us,
    /// as opposed to the remote being unreachable or refusing the call.
    pub fn is_upstream_config(&self) -> bool {
        matches!(
            self,
            TollgateError::InvalidSystemUrl { .. }
                | TollgateError::InvalidBackendEndpoint { .. }
                | TollgateError::UnsupportedAuthKind(_)
        )
    }
}

impl From<serde_json::Error> for TollgateError {
    fn from(err: serde_json::Error) -> Self {
        TollgateError::Json(err.to_string())
    }
}

/// Result type alias for Tollgate operations
pub type Result<T> = std::result::Result<T, TollgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_errors_name_the_worker() {
        assert_eq!(
            TollgateError::WorkerAlreadyRunning(WorkerKind::Flush).to_string(),
            "flush worker is already running"
        );
        assert_eq!(
            TollgateError::WorkerNotRunning(WorkerKind::Refresh).to_string(),
            "refresh worker is not running"
        );
    }

    #[test]
    fn upstream_config_classification() {
        assert!(TollgateError::UnsupportedAuthKind("oauth".into()).is_upstream_config());
        assert!(
            TollgateError::InvalidSystemUrl {
                url: "::".into(),
                reason: "relative URL without a base".into(),
            }
            .is_upstream_config()
        );
        assert!(
            !TollgateError::Api {
                status: 404,
                message: "not found".into(),
            }
            .is_upstream_config()
        );
        assert!(!TollgateError::Http("connection refused".into()).is_upstream_config());
    }
}
