//! Configuration document generation.
//!
//! Materializes the effective rule sequence into the serialized document the
//! controlled process reads. The routing-rule section contains exactly the
//! entries of `RuleStore::effective_rules()`, in that order; generation
//! re-validates every outbound against the current namespace and fails on a
//! dangling reference instead of emitting a config the process would reject.
//!
//! Generation is pure: no version bump, no process side effects.

use serde::Serialize;

use crate::error::{ControlError, Result};
use crate::namespace;
use crate::types::{OutboundTarget, RuleEntry, RuleType};

/// Default remote rule-set locations (sing-geosite / sing-geoip mirrors).
pub const DEFAULT_GEOSITE_BASE_URL: &str =
    "https://raw.githubusercontent.com/SagerNet/sing-geosite/rule-set";
pub const DEFAULT_GEOIP_BASE_URL: &str =
    "https://raw.githubusercontent.com/SagerNet/sing-geoip/rule-set";

/// Options for config generation.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Log level emitted into the document's log section.
    pub log_level: String,
    /// Base URL for `geosite-*.srs` rule-set downloads.
    pub geosite_base_url: String,
    /// Base URL for `geoip-*.srs` rule-set downloads.
    pub geoip_base_url: String,
    /// Outbound for traffic no rule matched.
    pub final_outbound: String,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            geosite_base_url: DEFAULT_GEOSITE_BASE_URL.to_string(),
            geoip_base_url: DEFAULT_GEOIP_BASE_URL.to_string(),
            final_outbound: "Proxy".to_string(),
        }
    }
}

impl GenerateOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback outbound.
    pub fn with_final_outbound(mut self, outbound: impl Into<String>) -> Self {
        self.final_outbound = outbound.into();
        self
    }
}

/// The generated configuration document.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigDocument {
    pub log: LogSection,
    pub route: RouteSection,
}

impl ConfigDocument {
    /// Render the document as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Log section of the generated document.
#[derive(Debug, Clone, Serialize)]
pub struct LogSection {
    pub level: String,
    pub timestamp: bool,
}

/// Route section of the generated document.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSection {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RouteRule>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rule_set: Vec<RuleSetRef>,
    #[serde(rename = "final")]
    pub final_outbound: String,
    pub auto_detect_interface: bool,
}

/// One routing rule. Exactly one matcher field group is populated per rule.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteRule {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub domain_suffix: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub domain_keyword: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub domain: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip_cidr: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub port: Vec<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub port_range: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rule_set: Vec<String>,
    pub outbound: String,
}

/// A remote rule-set descriptor referenced from the route section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleSetRef {
    pub tag: String,
    #[serde(rename = "type")]
    pub set_type: String,
    pub format: String,
    pub url: String,
    pub download_detour: String,
}

/// Generate the configuration document for the given effective rules.
///
/// Fails with `InvalidOutbound` if any entry references an outbound that is
/// neither a built-in nor a member of the namespace.
pub fn generate(
    entries: &[RuleEntry],
    ns: &[OutboundTarget],
    options: &GenerateOptions,
) -> Result<ConfigDocument> {
    let mut rules = Vec::with_capacity(entries.len());
    let mut set_collector = RuleSetCollector::new(options);

    for entry in entries {
        if !namespace::is_valid_outbound(ns, entry.outbound()) {
            return Err(ControlError::InvalidOutbound(entry.outbound().to_string()));
        }
        rules.push(build_route_rule(entry, &mut set_collector)?);
    }

    Ok(ConfigDocument {
        log: LogSection {
            level: options.log_level.clone(),
            timestamp: true,
        },
        route: RouteSection {
            rules,
            rule_set: set_collector.into_refs(),
            final_outbound: options.final_outbound.clone(),
            auto_detect_interface: true,
        },
    })
}

fn build_route_rule(entry: &RuleEntry, sets: &mut RuleSetCollector) -> Result<RouteRule> {
    let mut rule = RouteRule {
        outbound: entry.outbound().to_string(),
        ..RouteRule::default()
    };

    match entry {
        RuleEntry::Group(group) => {
            for token in &group.site_rules {
                rule.rule_set.push(sets.geosite(token));
            }
            for token in &group.ip_rules {
                rule.rule_set.push(sets.geoip(token));
            }
        }
        RuleEntry::Custom(custom) => match custom.rule_type {
            RuleType::DomainSuffix => rule.domain_suffix = custom.values.clone(),
            RuleType::DomainKeyword => rule.domain_keyword = custom.values.clone(),
            RuleType::Domain => rule.domain = custom.values.clone(),
            RuleType::IpCidr => rule.ip_cidr = custom.values.clone(),
            RuleType::Port => {
                for value in &custom.values {
                    if value.contains('-') {
                        rule.port_range.push(value.replace('-', ":"));
                    } else {
                        let port: u16 = value.parse().map_err(|_| {
                            ControlError::validation(format!("Invalid port: {}", value))
                        })?;
                        rule.port.push(port);
                    }
                }
            }
            RuleType::Geosite => {
                for token in &custom.values {
                    rule.rule_set.push(sets.geosite(token));
                }
            }
            RuleType::Geoip => {
                for token in &custom.values {
                    rule.rule_set.push(sets.geoip(token));
                }
            }
        },
    }

    Ok(rule)
}

/// Collects referenced rule-set tags, first-seen order, without duplicates.
struct RuleSetCollector {
    geosite_base: String,
    geoip_base: String,
    refs: Vec<RuleSetRef>,
}

impl RuleSetCollector {
    fn new(options: &GenerateOptions) -> Self {
        Self {
            geosite_base: options.geosite_base_url.clone(),
            geoip_base: options.geoip_base_url.clone(),
            refs: Vec::new(),
        }
    }

    fn geosite(&mut self, token: &str) -> String {
        let tag = format!("geosite-{}", token);
        let url = format!("{}/geosite-{}.srs", self.geosite_base, token);
        self.add(&tag, url);
        tag
    }

    fn geoip(&mut self, token: &str) -> String {
        let tag = format!("geoip-{}", token);
        let url = format!("{}/geoip-{}.srs", self.geoip_base, token);
        self.add(&tag, url);
        tag
    }

    fn add(&mut self, tag: &str, url: String) {
        if self.refs.iter().any(|r| r.tag == tag) {
            return;
        }
        self.refs.push(RuleSetRef {
            tag: tag.to_string(),
            set_type: "remote".to_string(),
            format: "binary".to_string(),
            url,
            download_detour: "DIRECT".to_string(),
        });
    }

    fn into_refs(self) -> Vec<RuleSetRef> {
        self.refs
    }
}
