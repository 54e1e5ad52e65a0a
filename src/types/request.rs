//! Inbound request as seen by the authorization pipeline.

use std::fmt;

/// Credential presented by the API consumer.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Single-key authentication.
    UserKey(String),
    /// Application identifier, optionally paired with an application key.
    AppId {
        app_id: String,
        app_key: Option<String>,
    },
}

impl Credential {
    /// An empty identifier counts as no credential at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Credential::UserKey(key) => key.is_empty(),
            Credential::AppId { app_id, .. } => app_id.is_empty(),
        }
    }

    /// Query parameters the backend expects for this credential.
    pub fn query_pairs(&self) -> Vec<(&'static str, &str)> {
        match self {
            Credential::UserKey(key) => vec![("user_key", key.as_str())],
            Credential::AppId { app_id, app_key } => {
                let mut pairs = vec![("app_id", app_id.as_str())];
                if let Some(key) = app_key.as_deref().filter(|k| !k.is_empty()) {
                    pairs.push(("app_key", key));
                }
                pairs
            }
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::UserKey(_) => f.write_str("UserKey(<redacted>)"),
            Credential::AppId { app_id, app_key } => f
                .debug_struct("AppId")
                .field("app_id", app_id)
                .field("app_key", &app_key.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// One request to authorize.
///
/// ```rust
/// # use tollgate::AuthorizationRequest;
/// let request = AuthorizationRequest::new("GET", "/orders?page=2").user_key("k-123");
/// assert!(request.credential.is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub method: String,
    pub path: String,
    pub credential: Option<Credential>,
}

impl AuthorizationRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            credential: None,
        }
    }

    /// Authenticate with a user key.
    pub fn user_key(mut self, key: impl Into<String>) -> Self {
        self.credential = Some(Credential::UserKey(key.into()));
        self
    }

    /// Authenticate with an application id and optional key.
    pub fn app_id(mut self, app_id: impl Into<String>, app_key: Option<String>) -> Self {
        self.credential = Some(Credential::AppId {
            app_id: app_id.into(),
            app_key,
        });
        self
    }

    /// The credential, if one was presented and is non-empty.
    pub fn present_credential(&self) -> Option<&Credential> {
        self.credential.as_ref().filter(|c| !c.is_empty())
    }
}
