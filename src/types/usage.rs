//! Metered usage reported to the backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metric name → delta accumulated for one request.
///
/// Adding the same metric twice sums the deltas. Iteration is ordered by
/// metric name so backend query strings are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageReport(BTreeMap<String, u64>);

impl UsageReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to `metric`, creating it if absent.
    pub fn add(&mut self, metric: impl Into<String>, delta: u64) {
        let entry = self.0.entry(metric.into()).or_insert(0);
        *entry = entry.saturating_add(delta);
    }

    pub fn get(&self, metric: &str) -> Option<u64> {
        self.0.get(metric).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for UsageReport {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut report = UsageReport::new();
        for (metric, delta) in iter {
            report.add(metric, delta);
        }
        report
    }
}
