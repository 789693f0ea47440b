//! In-memory authoritative rule model.
//!
//! The store owns the preset rule groups and the operator's custom rules,
//! enforces validation invariants on every edit, and tracks a monotonically
//! increasing configuration version used to detect staleness against the
//! running process.
//!
//! All mutations run under one mutex so that validate-then-commit is atomic
//! per call: readers never observe a partially applied edit, and a rejected
//! edit leaves the collections untouched.

mod presets;

use ipnet::IpNet;
use parking_lot::Mutex;
use std::net::IpAddr;

use crate::error::{ControlError, Result};
use crate::namespace;
use crate::types::{
    ConfigVersion, CustomRule, CustomRulePatch, CustomRuleSpec, OutboundTarget, RuleEntry,
    RuleGroup, RuleType,
};

/// Authoritative store for rule groups and custom rules.
pub struct RuleStore {
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    /// Preset groups in registration order; the order is part of the
    /// effective-rules contract.
    rule_groups: Vec<RuleGroup>,
    /// Custom rules in creation order.
    custom_rules: Vec<CustomRule>,
    version: ConfigVersion,
    next_id: u64,
    next_seq: u64,
}

impl RuleStore {
    /// Create a store seeded with the preset rule groups.
    pub fn new() -> Self {
        Self::with_rule_groups(presets::seed_rule_groups())
    }

    /// Create a store seeded with the given rule groups.
    pub fn with_rule_groups(rule_groups: Vec<RuleGroup>) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                rule_groups,
                custom_rules: Vec::new(),
                version: 0,
                next_id: 1,
                next_seq: 1,
            }),
        }
    }

    /// Current configuration version.
    pub fn version(&self) -> ConfigVersion {
        self.inner.lock().version
    }

    /// Snapshot of all rule groups in registration order.
    pub fn rule_groups(&self) -> Vec<RuleGroup> {
        self.inner.lock().rule_groups.clone()
    }

    /// Snapshot of all custom rules in creation order.
    pub fn custom_rules(&self) -> Vec<CustomRule> {
        self.inner.lock().custom_rules.clone()
    }

    /// Look up a rule group by id.
    pub fn get_rule_group(&self, id: &str) -> Result<RuleGroup> {
        let inner = self.inner.lock();
        inner
            .rule_groups
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| ControlError::not_found("rule group", id))
    }

    /// Look up a custom rule by id.
    pub fn get_custom_rule(&self, id: &str) -> Result<CustomRule> {
        let inner = self.inner.lock();
        inner
            .custom_rules
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| ControlError::not_found("rule", id))
    }

    /// Flip a preset's enabled flag.
    ///
    /// Idempotent: setting the flag to its current value commits nothing and
    /// does not bump the version.
    pub fn toggle_rule_group(&self, id: &str, enabled: bool) -> Result<RuleGroup> {
        let mut inner = self.inner.lock();
        let group = inner
            .rule_groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| ControlError::not_found("rule group", id))?;

        if group.enabled != enabled {
            group.enabled = enabled;
            let group = group.clone();
            inner.version += 1;
            return Ok(group);
        }
        Ok(group.clone())
    }

    /// Retarget a preset's outbound.
    ///
    /// The outbound must be a member of the given namespace (built-ins are
    /// always legal). Bumps the version only on actual change.
    pub fn set_rule_group_outbound(
        &self,
        id: &str,
        outbound: &str,
        namespace: &[OutboundTarget],
    ) -> Result<RuleGroup> {
        let mut inner = self.inner.lock();
        let group = inner
            .rule_groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| ControlError::not_found("rule group", id))?;

        if !namespace::is_valid_outbound(namespace, outbound) {
            return Err(ControlError::InvalidOutbound(outbound.to_string()));
        }

        if group.outbound != outbound {
            group.outbound = outbound.to_string();
            let group = group.clone();
            inner.version += 1;
            return Ok(group);
        }
        Ok(group.clone())
    }

    /// Create a custom rule, assigning it a fresh identifier.
    pub fn create_custom_rule(
        &self,
        spec: CustomRuleSpec,
        namespace: &[OutboundTarget],
    ) -> Result<CustomRule> {
        let name = validate_name(&spec.name)?;
        let values = normalize_values(spec.rule_type, &spec.values)?;
        if !namespace::is_valid_outbound(namespace, &spec.outbound) {
            return Err(ControlError::InvalidOutbound(spec.outbound));
        }

        let mut inner = self.inner.lock();
        let id = format!("rule-{}", inner.next_id);
        inner.next_id += 1;
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let rule = CustomRule {
            id,
            name,
            rule_type: spec.rule_type,
            values,
            outbound: spec.outbound,
            enabled: spec.enabled,
            priority: spec.priority,
            seq,
        };
        inner.custom_rules.push(rule.clone());
        inner.version += 1;
        Ok(rule)
    }

    /// Apply a partial update to a custom rule.
    ///
    /// Validation runs against the merged result. The outbound is only
    /// revalidated when the patch sets it: an entity whose previously valid
    /// outbound has since left the namespace keeps working until the operator
    /// explicitly retargets it or configuration generation flags it.
    ///
    /// An update that changes nothing commits nothing and does not bump the
    /// version.
    pub fn update_custom_rule(
        &self,
        id: &str,
        patch: CustomRulePatch,
        namespace: &[OutboundTarget],
    ) -> Result<CustomRule> {
        let mut inner = self.inner.lock();
        let index = inner
            .custom_rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| ControlError::not_found("rule", id))?;

        let current = &inner.custom_rules[index];
        let rule_type = patch.rule_type.unwrap_or(current.rule_type);
        let name = validate_name(patch.name.as_deref().unwrap_or(&current.name))?;
        let values = match &patch.values {
            Some(values) => normalize_values(rule_type, values)?,
            None => normalize_values(rule_type, &current.values)?,
        };
        let outbound = match patch.outbound {
            Some(outbound) => {
                if !namespace::is_valid_outbound(namespace, &outbound) {
                    return Err(ControlError::InvalidOutbound(outbound));
                }
                outbound
            }
            None => current.outbound.clone(),
        };

        let merged = CustomRule {
            id: current.id.clone(),
            name,
            rule_type,
            values,
            outbound,
            enabled: patch.enabled.unwrap_or(current.enabled),
            priority: patch.priority.unwrap_or(current.priority),
            seq: current.seq,
        };

        if merged.name == current.name
            && merged.rule_type == current.rule_type
            && merged.values == current.values
            && merged.outbound == current.outbound
            && merged.enabled == current.enabled
            && merged.priority == current.priority
        {
            return Ok(current.clone());
        }

        inner.custom_rules[index] = merged.clone();
        inner.version += 1;
        Ok(merged)
    }

    /// Flip a custom rule's enabled flag. Idempotent, like rule groups.
    pub fn toggle_custom_rule(&self, id: &str, enabled: bool) -> Result<CustomRule> {
        let mut inner = self.inner.lock();
        let rule = inner
            .custom_rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| ControlError::not_found("rule", id))?;

        if rule.enabled != enabled {
            rule.enabled = enabled;
            let rule = rule.clone();
            inner.version += 1;
            return Ok(rule);
        }
        Ok(rule.clone())
    }

    /// Delete a custom rule.
    pub fn delete_custom_rule(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let index = inner
            .custom_rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| ControlError::not_found("rule", id))?;
        inner.custom_rules.remove(index);
        inner.version += 1;
        Ok(())
    }

    /// The effective ordered rule sequence consumed by config generation.
    ///
    /// Enabled rule groups first, in registration order, followed by enabled
    /// custom rules sorted ascending by priority with ties broken by creation
    /// order. The proxy evaluates top-to-bottom and stops at the first match.
    pub fn effective_rules(&self) -> Vec<RuleEntry> {
        let inner = self.inner.lock();
        let mut entries: Vec<RuleEntry> = inner
            .rule_groups
            .iter()
            .filter(|g| g.enabled)
            .cloned()
            .map(RuleEntry::Group)
            .collect();

        let mut customs: Vec<CustomRule> = inner
            .custom_rules
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect();
        customs.sort_by_key(|r| (r.priority, r.seq));
        entries.extend(customs.into_iter().map(RuleEntry::Custom));
        entries
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate and trim an entity name.
fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ControlError::validation("Name must not be empty"));
    }
    Ok(name.to_string())
}

/// Trim value tokens, drop empties, and type-check what remains.
///
/// An edit that would leave the list empty is rejected, not silently coerced.
fn normalize_values(rule_type: RuleType, values: &[String]) -> Result<Vec<String>> {
    let values: Vec<String> = values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Err(ControlError::validation(
            "Values must contain at least one non-empty entry",
        ));
    }
    for value in &values {
        check_value(rule_type, value)?;
    }
    Ok(values)
}

fn check_value(rule_type: RuleType, value: &str) -> Result<()> {
    match rule_type {
        RuleType::IpCidr => {
            if value.parse::<IpNet>().is_err() && value.parse::<IpAddr>().is_err() {
                return Err(ControlError::validation(format!(
                    "Invalid CIDR or IP: {}",
                    value
                )));
            }
        }
        RuleType::Port => {
            // Single port or inclusive range "start-end".
            let (start, end) = match value.split_once('-') {
                Some((start, end)) => (parse_port(start)?, parse_port(end)?),
                None => {
                    let port = parse_port(value)?;
                    (port, port)
                }
            };
            if start > end {
                return Err(ControlError::validation(format!(
                    "Invalid port range: {} > {}",
                    start, end
                )));
            }
        }
        // Domain and rule-set tokens are opaque to the store; the controlled
        // process resolves them.
        _ => {}
    }
    Ok(())
}

fn parse_port(s: &str) -> Result<u16> {
    let port: u16 = s
        .trim()
        .parse()
        .map_err(|_| ControlError::validation(format!("Invalid port: {}", s)))?;
    if port == 0 {
        return Err(ControlError::validation("Port must be non-zero"));
    }
    Ok(port)
}
