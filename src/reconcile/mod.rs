//! Reconciliation between committed rule state and the running process.
//!
//! Tracks the configuration version last successfully applied to the process
//! and, when the auto-apply policy is on, closes the gap in the background:
//! a mutation nudges the worker, the worker captures the current version,
//! applies, and records the captured version. A mutation arriving mid-apply
//! is picked up by the next pass of the same loop, never dropped. With
//! auto-apply off the divergence is only surfaced through `is_stale`.
//!
//! A separate probe task refreshes the observed process state on a fixed
//! schedule, independent of lifecycle commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::{ControlError, Result};
use crate::types::ConfigVersion;

/// Default interval between status probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Delay before retrying an apply that lost the race for the process gate.
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(100);

/// What the reconciler drives: a versioned rule source whose current state
/// can be applied to the controlled process.
#[async_trait]
pub trait ApplyTarget: Send + Sync {
    /// Current committed configuration version.
    fn version(&self) -> ConfigVersion;

    /// Render the current effective configuration and apply it.
    async fn apply_current(&self) -> Result<()>;

    /// Refresh the observed process state.
    async fn probe(&self);
}

/// Reconciler options.
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Whether committed mutations are propagated automatically.
    pub auto_apply: bool,
    /// Interval between status probes.
    pub probe_interval: Duration,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            auto_apply: true,
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

impl ReconcilerOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
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
}

struct Shared {
    target: Arc<dyn ApplyTarget>,
    notify: Notify,
    last_applied: Mutex<ConfigVersion>,
    auto_apply: AtomicBool,
}

/// Background coordinator: apply worker plus status probe.
pub struct Reconciler {
    shared: Arc<Shared>,
    worker: JoinHandle<()>,
    probe: JoinHandle<()>,
}

impl Reconciler {
    /// Spawn the worker and probe tasks. Must be called within a tokio
    /// runtime.
    pub fn spawn(target: Arc<dyn ApplyTarget>, options: ReconcilerOptions) -> Self {
        let shared = Arc::new(Shared {
            target,
            notify: Notify::new(),
            last_applied: Mutex::new(0),
            auto_apply: AtomicBool::new(options.auto_apply),
        });

        let worker = tokio::spawn(worker_loop(shared.clone()));
        let probe = tokio::spawn(probe_loop(shared.clone(), options.probe_interval));

        Self {
            shared,
            worker,
            probe,
        }
    }

    /// Version last successfully applied to the process.
    pub fn last_applied(&self) -> ConfigVersion {
        *self.shared.last_applied.lock()
    }

    /// Whether committed rule state has diverged from what was applied.
    pub fn is_stale(&self) -> bool {
        self.shared.target.version() != self.last_applied()
    }

    /// Current auto-apply policy.
    pub fn auto_apply(&self) -> bool {
        self.shared.auto_apply.load(Ordering::Relaxed)
    }

    /// Switch the auto-apply policy. Enabling it immediately reconciles any
    /// pending divergence.
    pub fn set_auto_apply(&self, auto_apply: bool) {
        self.shared.auto_apply.store(auto_apply, Ordering::Relaxed);
        if auto_apply {
            self.nudge();
        }
    }

    /// Signal that a mutation was committed. A no-op with auto-apply off.
    pub fn nudge(&self) {
        if self.auto_apply() {
            self.shared.notify.notify_one();
        }
    }

    /// Record a successful operator-triggered apply of the given version.
    pub fn mark_applied(&self, version: ConfigVersion) {
        *self.shared.last_applied.lock() = version;
    }

    /// Stop the background tasks.
    pub fn shutdown(&self) {
        self.worker.abort();
        self.probe.abort();
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn worker_loop(shared: Arc<Shared>) {
    loop {
        shared.notify.notified().await;

        loop {
            if !shared.auto_apply.load(Ordering::Relaxed) {
                break;
            }
            // Capture the version before applying: a mutation landing while
            // the apply runs keeps the loop going for another pass.
            let version = shared.target.version();
            if version == *shared.last_applied.lock() {
                break;
            }

            match shared.target.apply_current().await {
                Ok(()) => {
                    *shared.last_applied.lock() = version;
                    debug!("Auto-applied configuration version {}", version);
                }
                Err(ControlError::OperationInProgress(_)) => {
                    // A lifecycle command holds the gate; retry shortly.
                    tokio::time::sleep(BUSY_RETRY_DELAY).await;
                }
                Err(e) => {
                    // Surfaced through is_stale; no automatic retry.
                    warn!("Auto-apply of version {} failed: {}", version, e);
                    break;
                }
            }
        }
    }
}

async fn probe_loop(shared: Arc<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        shared.target.probe().await;
    }
}
