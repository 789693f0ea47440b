//! Engine facade.
//!
//! Wires the rule store, the process controller and the reconciler together
//! and exposes the operations the management API is built on: rule-group and
//! custom-rule editing, config preview/generate/apply, and process lifecycle
//! commands. The country-group and filter collections are read-only inputs
//! fed in by their external owners; every namespace-sensitive operation
//! resolves them fresh.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::generate::{generate, GenerateOptions};
use crate::namespace;
use crate::process::{
    ControllerOptions, ProcessController, ProcessDriver, DEFAULT_OP_TIMEOUT,
};
use crate::reconcile::{ApplyTarget, Reconciler, ReconcilerOptions, DEFAULT_PROBE_INTERVAL};
use crate::store::RuleStore;
use crate::types::{
    ConfigVersion, CountryGroup, CustomRule, CustomRulePatch, CustomRuleSpec, Filter,
    OutboundTarget, ProcessStatus, RuleEntry, RuleGroup,
};

/// Manager options.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Where the generated configuration artifact is written.
    pub config_path: PathBuf,
    /// Whether committed mutations are applied automatically.
    pub auto_apply: bool,
    /// Interval between status probes.
    pub probe_interval: Duration,
    /// Bound on a single lifecycle operation.
    pub op_timeout: Duration,
    /// Config generation options.
    pub generate: GenerateOptions,
}

impl ManagerOptions {
    /// Create options for the given configuration path.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            auto_apply: true,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            op_timeout: DEFAULT_OP_TIMEOUT,
            generate: GenerateOptions::default(),
        }
    }

    /// Set the auto-apply policy.
    pub fn with_auto_apply(mut self, auto_apply: bool) -> Self {
        self.auto_apply = auto_apply;
        self
    }

    /// Set the probe interval.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the lifecycle operation timeout.
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Set the config generation options.
    pub fn with_generate_options(mut self, generate: GenerateOptions) -> Self {
        self.generate = generate;
        self
    }
}

#[derive(Default)]
struct Inputs {
    country_groups: Vec<CountryGroup>,
    filters: Vec<Filter>,
}

/// Shared core: everything both the facade and the reconciler touch.
struct EngineCore {
    store: RuleStore,
    controller: ProcessController,
    inputs: Mutex<Inputs>,
    generate: GenerateOptions,
}

impl EngineCore {
    fn namespace(&self) -> Vec<OutboundTarget> {
        let inputs = self.inputs.lock();
        namespace::resolve(&inputs.country_groups, &inputs.filters)
    }

    /// Render the current effective configuration to JSON. Pure.
    fn render(&self) -> Result<String> {
        let entries = self.store.effective_rules();
        let ns = self.namespace();
        generate(&entries, &ns, &self.generate)?.to_json()
    }
}

#[async_trait]
impl ApplyTarget for EngineCore {
    fn version(&self) -> ConfigVersion {
        self.store.version()
    }

    async fn apply_current(&self) -> Result<()> {
        let document = self.render()?;
        self.controller.apply(&document).await.map(|_| ())
    }

    async fn probe(&self) {
        self.controller.probe().await;
    }
}

/// The engine facade.
pub struct Manager {
    core: Arc<EngineCore>,
    reconciler: Reconciler,
}

impl Manager {
    /// Create a manager over the given process driver.
    ///
    /// Spawns the reconciler's background tasks; must be called within a
    /// tokio runtime.
    pub fn new(driver: Arc<dyn ProcessDriver>, options: ManagerOptions) -> Self {
        let controller_options = ControllerOptions::new(options.config_path.clone())
            .with_op_timeout(options.op_timeout);
        let core = Arc::new(EngineCore {
            store: RuleStore::new(),
            controller: ProcessController::new(driver, controller_options),
            inputs: Mutex::new(Inputs::default()),
            generate: options.generate.clone(),
        });

        let reconciler_options = ReconcilerOptions::new()
            .with_auto_apply(options.auto_apply)
            .with_probe_interval(options.probe_interval);
        let reconciler = Reconciler::spawn(core.clone(), reconciler_options);

        Self { core, reconciler }
    }

    // ---- read-only inputs --------------------------------------------------

    /// Replace the country-group collection.
    pub fn set_country_groups(&self, groups: Vec<CountryGroup>) {
        self.core.inputs.lock().country_groups = groups;
    }

    /// Replace the filter collection.
    pub fn set_filters(&self, filters: Vec<Filter>) {
        self.core.inputs.lock().filters = filters;
    }

    /// Snapshot of the country groups.
    pub fn country_groups(&self) -> Vec<CountryGroup> {
        self.core.inputs.lock().country_groups.clone()
    }

    /// Snapshot of the filters.
    pub fn filters(&self) -> Vec<Filter> {
        self.core.inputs.lock().filters.clone()
    }

    /// The current outbound namespace.
    pub fn namespace(&self) -> Vec<OutboundTarget> {
        self.core.namespace()
    }

    // ---- rule groups -------------------------------------------------------

    /// All rule groups in registration order.
    pub fn rule_groups(&self) -> Vec<RuleGroup> {
        self.core.store.rule_groups()
    }

    /// Flip a preset's enabled flag.
    pub fn toggle_rule_group(&self, id: &str, enabled: bool) -> Result<RuleGroup> {
        let before = self.core.store.version();
        let group = self.core.store.toggle_rule_group(id, enabled)?;
        self.after_mutation(before);
        Ok(group)
    }

    /// Retarget a preset's outbound.
    pub fn set_rule_group_outbound(&self, id: &str, outbound: &str) -> Result<RuleGroup> {
        let ns = self.core.namespace();
        let before = self.core.store.version();
        let group = self.core.store.set_rule_group_outbound(id, outbound, &ns)?;
        self.after_mutation(before);
        Ok(group)
    }

    // ---- custom rules ------------------------------------------------------

    /// All custom rules in creation order.
    pub fn custom_rules(&self) -> Vec<CustomRule> {
        self.core.store.custom_rules()
    }

    /// Create a custom rule.
    pub fn create_custom_rule(&self, spec: CustomRuleSpec) -> Result<CustomRule> {
        let ns = self.core.namespace();
        let before = self.core.store.version();
        let rule = self.core.store.create_custom_rule(spec, &ns)?;
        self.after_mutation(before);
        Ok(rule)
    }

    /// Update a custom rule.
    pub fn update_custom_rule(&self, id: &str, patch: CustomRulePatch) -> Result<CustomRule> {
        let ns = self.core.namespace();
        let before = self.core.store.version();
        let rule = self.core.store.update_custom_rule(id, patch, &ns)?;
        self.after_mutation(before);
        Ok(rule)
    }

    /// Flip a custom rule's enabled flag.
    pub fn toggle_custom_rule(&self, id: &str, enabled: bool) -> Result<CustomRule> {
        let before = self.core.store.version();
        let rule = self.core.store.toggle_custom_rule(id, enabled)?;
        self.after_mutation(before);
        Ok(rule)
    }

    /// Delete a custom rule.
    pub fn delete_custom_rule(&self, id: &str) -> Result<()> {
        let before = self.core.store.version();
        self.core.store.delete_custom_rule(id)?;
        self.after_mutation(before);
        Ok(())
    }

    /// The effective ordered rule sequence.
    pub fn effective_rules(&self) -> Vec<RuleEntry> {
        self.core.store.effective_rules()
    }

    // ---- configuration -----------------------------------------------------

    /// Render the current effective configuration without side effects.
    pub fn preview_config(&self) -> Result<String> {
        self.core.render()
    }

    /// Write the configuration artifact without touching the process.
    pub async fn generate_config(&self) -> Result<()> {
        let document = self.core.render()?;
        self.core.controller.write_config(&document).await
    }

    /// Write the configuration artifact and restart the process if Running.
    pub async fn apply_config(&self) -> Result<ProcessStatus> {
        let version = self.core.store.version();
        let document = self.core.render()?;
        let status = self.core.controller.apply(&document).await?;
        self.reconciler.mark_applied(version);
        Ok(status)
    }

    // ---- process lifecycle -------------------------------------------------

    /// Last observed process status.
    pub fn status(&self) -> ProcessStatus {
        self.core.controller.status()
    }

    /// Start the process.
    pub async fn start(&self) -> Result<ProcessStatus> {
        self.core.controller.start().await
    }

    /// Stop the process.
    pub async fn stop(&self) -> Result<ProcessStatus> {
        self.core.controller.stop().await
    }

    /// Restart the process.
    pub async fn restart(&self) -> Result<ProcessStatus> {
        self.core.controller.restart().await
    }

    /// Reload the process configuration, degrading to a restart when the
    /// driver cannot reload in place.
    pub async fn reload(&self) -> Result<ProcessStatus> {
        self.core.controller.reload().await
    }

    // ---- reconciliation ----------------------------------------------------

    /// Current committed configuration version.
    pub fn config_version(&self) -> ConfigVersion {
        self.core.store.version()
    }

    /// Version last successfully applied to the process.
    pub fn last_applied_version(&self) -> ConfigVersion {
        self.reconciler.last_applied()
    }

    /// Whether committed rule state has diverged from what was applied.
    pub fn is_stale(&self) -> bool {
        self.reconciler.is_stale()
    }

    /// Current auto-apply policy.
    pub fn auto_apply(&self) -> bool {
        self.reconciler.auto_apply()
    }

    /// Switch the auto-apply policy.
    pub fn set_auto_apply(&self, auto_apply: bool) {
        self.reconciler.set_auto_apply(auto_apply);
    }

    /// Stop the background tasks.
    pub fn shutdown(&self) {
        self.reconciler.shutdown();
    }

    fn after_mutation(&self, before: ConfigVersion) {
        if self.core.store.version() != before {
            self.reconciler.nudge();
        }
    }
}
