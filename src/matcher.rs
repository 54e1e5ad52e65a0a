//! Mapping rule matching.

use crate::types::{MappingRule, UsageReport};

/// Accumulate the usage of every rule matching `method` and `path`.
///
/// Rules naming the same metric sum their deltas. An empty report means no
/// rule applied.
pub fn match_rules(rules: &[MappingRule], method: &str, path: &str) -> UsageReport {
    rules
        .iter()
        .filter(|rule| rule.matches(method, path))
        .map(|rule| (rule.metric.as_str(), rule.delta))
        .collect()
}
