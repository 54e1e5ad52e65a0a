//! HTTP client for the usage backend's authorize+report endpoint.
//!
//! Calls `GET {endpoint}/transactions/authrep.xml` with the backend
//! credentials, the consumer credential and `usage[metric]=delta` pairs.
//!
//! # Response handling
//!
//! | Status | Meaning |
//! |--------|---------|
//! | 2xx    | authorized, unless the body says `<authorized>false</authorized>` |
//! | 4xx    | explicit denial, reason taken from `<reason>` or `<error>` |
//! | other  | backend failure (`Err`) |

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Url};
use tracing::{debug, instrument};

use super::traits::{AuthRepRequest, AuthRepResponse, BackendClient};
use crate::{Result, TollgateError};

/// Default request timeout for backend calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

static REASON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<reason>(.*?)</reason>").expect("static regex"));
static ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<error(?:\s[^>]*)?>(.*?)</error>").expect("static regex"));
static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+|#x[0-9a-fA-F]+|quot|apos|lt|gt|amp);").expect("static regex")
});
static AUTHORIZED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<authorized>\s*(true|false)\s*</authorized>").expect("static regex")
});

/// [`BackendClient`] speaking the backend's HTTP API.
#[derive(Clone)]
pub struct HttpBackendClient {
    http: Client,
}

impl HttpBackendClient {
    /// Create a client with the default timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TollgateError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

/// Build the authrep URL for `request`.
pub fn authrep_url(request: &AuthRepRequest) -> Result<Url> {
    let mut url = request.endpoint.clone();
    url.path_segments_mut()
        .map_err(|()| TollgateError::InvalidBackendEndpoint {
            url: request.endpoint.to_string(),
            reason: "cannot be a base URL".to_string(),
        })?
        .pop_if_empty()
        .extend(["transactions", "authrep.xml"]);
    {
        let mut query = url.query_pairs_mut();
        query.append_pair(request.credentials.kind.as_param(), &request.credentials.value);
        query.append_pair("service_id", &request.service_id);
        for (name, value) in request.credential.query_pairs() {
            query.append_pair(name, value);
        }
        for (metric, delta) in request.usage.iter() {
            query.append_pair(&format!("usage[{metric}]"), &delta.to_string());
        }
    }
    Ok(url)
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    fn name(&self) -> &str {
        "backend"
    }

    #[instrument(name = "backend.authrep", skip(self, request), fields(service_id = %request.service_id))]
    async fn authrep(&self, request: &AuthRepRequest) -> Result<AuthRepResponse> {
        let url = authrep_url(request)?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| TollgateError::Http(e.without_url().to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TollgateError::Http(e.without_url().to_string()))?;

        let verdict = interpret_response(status, &body)?;
        debug!(status, success = verdict.success, "backend answered");
        Ok(verdict)
    }
}

/// Turn a backend HTTP answer into a verdict.
pub fn interpret_response(status: u16, body: &str) -> Result<AuthRepResponse> {
    match status {
        200..=299 => {
            let denied = AUTHORIZED_RE
                .captures(body)
                .is_some_and(|c| &c[1] == "false");
            if denied {
                Ok(AuthRepResponse::denied(status, extract_reason(status, body)))
            } else {
                Ok(AuthRepResponse::authorized(status))
            }
        }
        400..=499 => Ok(AuthRepResponse::denied(status, extract_reason(status, body))),
        _ => Err(TollgateError::Api {
            status,
            message: format!("backend error: HTTP {status}"),
        }),
    }
}

fn extract_reason(status: u16, body: &str) -> String {
    REASON_RE
        .captures(body)
        .or_else(|| ERROR_RE.captures(body))
        .map(|c| unescape(c[1].trim()))
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| format!("backend denied the request (HTTP {status})"))
}

/// Decode the predefined XML entities and numeric character references.
/// Anything unrecognised is kept verbatim.
fn unescape(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |c: &regex::Captures<'_>| {
            let entity = &c[1];
            let decoded = match entity {
                "quot" => Some('"'),
                "apos" => Some('\''),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                _ => entity
                    .strip_prefix("#x")
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .unwrap_or_else(|| entity[1..].parse())
                    .ok()
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| c[0].to_string(), String::from)
        })
        .into_owned()
}
