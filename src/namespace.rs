//! Outbound namespace resolution.
//!
//! Derives the full set of legal routing targets from the current country
//! groups and filters. The namespace is a pure function of its inputs and is
//! never cached: callers re-invoke `resolve` after any change to either
//! collection, and its output is the sole validation reference for outbound
//! assignment.

use std::collections::HashSet;

use crate::types::{CountryGroup, Filter, OutboundTarget};

/// Built-in outbounds, always present and never removable, in namespace order.
pub const BUILT_IN_OUTBOUNDS: [&str; 3] = ["Proxy", "DIRECT", "REJECT"];

/// Whether the label names a built-in outbound.
pub fn is_built_in(label: &str) -> bool {
    BUILT_IN_OUTBOUNDS.contains(&label)
}

/// Resolve the outbound namespace.
///
/// Ordering: built-ins first (`Proxy`, `DIRECT`, `REJECT`), then one entry
/// per country group with at least one node in input order, then one entry
/// per enabled filter in input order. Labels are unique; on a collision the
/// earlier entry wins and the later one is dropped.
pub fn resolve(country_groups: &[CountryGroup], filters: &[Filter]) -> Vec<OutboundTarget> {
    let mut targets = Vec::with_capacity(3 + country_groups.len() + filters.len());
    let mut seen: HashSet<String> = HashSet::new();

    for name in BUILT_IN_OUTBOUNDS {
        seen.insert(name.to_string());
        targets.push(OutboundTarget::built_in(name));
    }

    for group in country_groups {
        if group.node_count == 0 {
            continue;
        }
        let label = group.label();
        if seen.insert(label.clone()) {
            targets.push(OutboundTarget::country_group(label));
        }
    }

    for filter in filters {
        if !filter.enabled {
            continue;
        }
        if seen.insert(filter.name.clone()) {
            targets.push(OutboundTarget::filter(filter.name.clone()));
        }
    }

    targets
}

/// Whether the label is a legal outbound under the given namespace.
///
/// Built-ins are always legal, even against an empty namespace slice.
pub fn is_valid_outbound(namespace: &[OutboundTarget], label: &str) -> bool {
    is_built_in(label) || namespace.iter().any(|t| t.label == label)
}
