//! Telemetry metric names and reporting helpers.
//!
//! Consumers install their own `metrics` recorder (e.g. prometheus, statsd);
//! without a recorder installed, all metric calls are no-ops. Reporting is
//! fire-and-forget: nothing here can fail or block the authorization path.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `tollgate_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `endpoint`: which remote was called, "system" or "backend"
//! - `target`: tenant key the call was made for
//! - `code`: HTTP status of the remote call ("0" on transport failure)

use std::time::Duration;

/// Remote endpoint kinds used as the `endpoint` label.
pub const ENDPOINT_SYSTEM: &str = "system";
pub const ENDPOINT_BACKEND: &str = "backend";

/// Total authorization requests evaluated.
pub const REQUESTS_TOTAL: &str = "tollgate_requests_total";

/// Remote call duration in seconds.
///
/// Labels: `endpoint`, `target`.
pub const REMOTE_DURATION_SECONDS: &str = "tollgate_remote_duration_seconds";

/// Remote call outcomes.
///
/// Labels: `endpoint`, `target`, `code`.
pub const REMOTE_RESPONSES_TOTAL: &str = "tollgate_remote_responses_total";

/// Total proxy configuration cache hits.
pub const CACHE_HITS_TOTAL: &str = "tollgate_cache_hits_total";

/// Total proxy configuration cache misses.
pub const CACHE_MISSES_TOTAL: &str = "tollgate_cache_misses_total";

/// Record how long a remote call took.
pub fn report_latency(endpoint: &'static str, target: &str, elapsed: Duration) {
    metrics::histogram!(REMOTE_DURATION_SECONDS,
        "endpoint" => endpoint,
        "target" => target.to_owned(),
    )
    .record(elapsed.as_secs_f64());
}

/// Record the status code a remote call finished with.
pub fn report_outcome(endpoint: &'static str, target: &str, code: u16) {
    metrics::counter!(REMOTE_RESPONSES_TOTAL,
        "endpoint" => endpoint,
        "target" => target.to_owned(),
        "code" => code.to_string(),
    )
    .increment(1);
}

pub fn increment_cache_hit() {
    metrics::counter!(CACHE_HITS_TOTAL).increment(1);
}

pub fn increment_cache_miss() {
    metrics::counter!(CACHE_MISSES_TOTAL).increment(1);
}

pub fn increment_total_requests() {
    metrics::counter!(REQUESTS_TOTAL).increment(1);
}
