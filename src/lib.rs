//! routectl - routing-rule management and proxy process control engine
//!
//! This library is the core of a management dashboard for a local proxy
//! service. It provides:
//! - A layered rule model: preset rule groups plus operator-authored custom
//!   rules, with ordering and validation invariants enforced on every edit
//! - A dynamically resolved outbound namespace (built-ins, country groups,
//!   filters) used to validate routing targets
//! - A lifecycle state machine for the controlled proxy process with
//!   idempotent start/stop/restart/apply commands and bounded timeouts
//! - Background reconciliation: committed rule changes are detected by
//!   version and propagated to the running process under an auto-apply
//!   policy, with a periodic status probe for eventual consistency
//!
//! # Example
//!
//! ```rust
//! use routectl::{namespace, CustomRuleSpec, RuleStore, RuleType};
//!
//! let store = RuleStore::new();
//!
//! // The namespace is derived from the live country-group and filter
//! // collections; with neither present only the built-ins are legal.
//! let ns = namespace::resolve(&[], &[]);
//! assert_eq!(ns[0].label, "Proxy");
//!
//! let rule = store
//!     .create_custom_rule(
//!         CustomRuleSpec::new(
//!             "Block QUIC",
//!             RuleType::Port,
//!             vec!["443".to_string()],
//!             "REJECT",
//!         ),
//!         &ns,
//!     )
//!     .unwrap();
//! assert_eq!(rule.outbound, "REJECT");
//! assert_eq!(store.version(), 1);
//!
//! // Enabled rule groups come first, custom rules follow by priority.
//! let effective = store.effective_rules();
//! assert_eq!(effective.last().unwrap().name(), "Block QUIC");
//! ```
//!
//! Process control and reconciliation are async and run on tokio; see
//! [`Manager`] for the facade that wires everything together.

pub mod error;
pub mod generate;
pub mod manager;
pub mod namespace;
pub mod process;
pub mod reconcile;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use error::{ControlError, Result};
pub use generate::{
    generate, ConfigDocument, GenerateOptions, RouteRule, RuleSetRef, DEFAULT_GEOIP_BASE_URL,
    DEFAULT_GEOSITE_BASE_URL,
};
pub use manager::{Manager, ManagerOptions};
pub use namespace::BUILT_IN_OUTBOUNDS;
pub use process::{
    ControllerOptions, NilDriver, ProbeReport, ProcessController, ProcessDriver, SystemDriver,
    DEFAULT_OP_TIMEOUT, DEFAULT_PROBE_TIMEOUT, DEFAULT_START_GRACE,
};
pub use reconcile::{ApplyTarget, Reconciler, ReconcilerOptions, DEFAULT_PROBE_INTERVAL};
pub use store::RuleStore;
pub use types::{
    ConfigVersion, CountryGroup, CustomRule, CustomRulePatch, CustomRuleSpec, Filter,
    OutboundTarget, ProcessState, ProcessStatus, RuleEntry, RuleGroup, RuleType, TargetKind,
    DEFAULT_PRIORITY,
};
