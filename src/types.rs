use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// Monotonic counter over committed rule mutations.
///
/// Strictly increases for the lifetime of the store; never reset.
pub type ConfigVersion = u64;

/// Default priority assigned to new custom rules.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Matcher type of a custom rule.
///
/// The wire names (`domain_suffix`, `geosite`, ...) are the ones the
/// management API and the generated configuration use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    DomainSuffix,
    DomainKeyword,
    Domain,
    IpCidr,
    Geosite,
    Geoip,
    Port,
}

impl RuleType {
    /// All rule types, in display order.
    pub const ALL: [RuleType; 7] = [
        RuleType::DomainSuffix,
        RuleType::DomainKeyword,
        RuleType::Domain,
        RuleType::IpCidr,
        RuleType::Geosite,
        RuleType::Geoip,
        RuleType::Port,
    ];

    /// The wire name of this rule type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::DomainSuffix => "domain_suffix",
            RuleType::DomainKeyword => "domain_keyword",
            RuleType::Domain => "domain",
            RuleType::IpCidr => "ip_cidr",
            RuleType::Geosite => "geosite",
            RuleType::Geoip => "geoip",
            RuleType::Port => "port",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domain_suffix" => Ok(RuleType::DomainSuffix),
            "domain_keyword" => Ok(RuleType::DomainKeyword),
            "domain" => Ok(RuleType::Domain),
            "ip_cidr" => Ok(RuleType::IpCidr),
            "geosite" => Ok(RuleType::Geosite),
            "geoip" => Ok(RuleType::Geoip),
            "port" => Ok(RuleType::Port),
            other => Err(ControlError::validation(format!(
                "Unknown rule type: {}",
                other
            ))),
        }
    }
}

/// A preset bundle of site/ip rule-set tokens sharing one outbound and one
/// enable flag.
///
/// Rule groups are seeded at startup and never deleted; edits are limited to
/// toggling and retargeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleGroup {
    pub id: String,
    pub name: String,
    pub site_rules: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_rules: Vec<String>,
    pub outbound: String,
    pub enabled: bool,
}

/// An operator-authored routing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRule {
    pub id: String,
    pub name: String,
    pub rule_type: RuleType,
    pub values: Vec<String>,
    pub outbound: String,
    pub enabled: bool,
    pub priority: i32,
    /// Creation sequence, used as the stable tie-break for equal priorities.
    #[serde(skip)]
    pub(crate) seq: u64,
}

/// Input for creating a custom rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRuleSpec {
    pub name: String,
    pub rule_type: RuleType,
    pub values: Vec<String>,
    pub outbound: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl CustomRuleSpec {
    /// Create a spec with defaults (enabled, priority 100).
    pub fn new(
        name: impl Into<String>,
        rule_type: RuleType,
        values: Vec<String>,
        outbound: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            rule_type,
            values,
            outbound: outbound.into(),
            enabled: true,
            priority: DEFAULT_PRIORITY,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Partial update for a custom rule. `None` fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomRulePatch {
    pub name: Option<String>,
    pub rule_type: Option<RuleType>,
    pub values: Option<Vec<String>>,
    pub outbound: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
}

impl CustomRulePatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the values.
    pub fn with_values(mut self, values: Vec<String>) -> Self {
        self.values = Some(values);
        self
    }

    /// Set the outbound.
    pub fn with_outbound(mut self, outbound: impl Into<String>) -> Self {
        self.outbound = Some(outbound.into());
        self
    }

    /// Set the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// The kind of a resolved outbound target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    BuiltIn,
    CountryGroup,
    Filter,
}

/// A named routing destination a rule can send matching traffic to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundTarget {
    pub label: String,
    pub kind: TargetKind,
}

impl OutboundTarget {
    /// Create a built-in target.
    pub fn built_in(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: TargetKind::BuiltIn,
        }
    }

    /// Create a country-group target.
    pub fn country_group(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: TargetKind::CountryGroup,
        }
    }

    /// Create a filter target.
    pub fn filter(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            kind: TargetKind::Filter,
        }
    }
}

/// A node filter, owned externally. Only name and enabled are read here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub id: String,
    pub name: String,
    pub enabled: bool,
}

/// A per-country node group, owned externally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryGroup {
    pub code: String,
    pub emoji: String,
    pub name: String,
    pub node_count: usize,
}

impl CountryGroup {
    /// The outbound label this group appears under, e.g. `"🇭🇰 香港"`.
    pub fn label(&self) -> String {
        format!("{} {}", self.emoji, self.name)
    }
}

/// Lifecycle state of the controlled proxy process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl ProcessState {
    /// Whether the process is up (Running) from the caller's point of view.
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
            ProcessState::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Observed status of the controlled process.
///
/// `pid` and `version` are populated while Running.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatus {
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub version: Option<String>,
}

impl ProcessStatus {
    /// The initial, stopped status.
    pub fn stopped() -> Self {
        Self {
            state: ProcessState::Stopped,
            pid: None,
            version: None,
        }
    }
}

/// One entry of the effective rule sequence consumed by config generation.
///
/// The proxy evaluates rules top-to-bottom and stops at the first match, so
/// the order of these entries is the routing contract.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleEntry {
    Group(RuleGroup),
    Custom(CustomRule),
}

impl RuleEntry {
    /// The entry's resolved outbound label.
    pub fn outbound(&self) -> &str {
        match self {
            RuleEntry::Group(g) => &g.outbound,
            RuleEntry::Custom(r) => &r.outbound,
        }
    }

    /// The entry's display name.
    pub fn name(&self) -> &str {
        match self {
            RuleEntry::Group(g) => &g.name,
            RuleEntry::Custom(r) => &r.name,
        }
    }
}
