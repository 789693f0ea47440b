//! Process lifecycle control.
//!
//! Models the controlled proxy process as a five-state machine (Stopped,
//! Starting, Running, Stopping, Crashed) and serializes lifecycle commands:
//! at most one start/stop/restart/apply runs at a time, and a command issued
//! while another is in flight fails fast with `OperationInProgress`.
//!
//! Every driver call is bounded by a timeout; on expiry the controller
//! reports the attempt failed and moves to Crashed rather than back to the
//! pre-attempt state, since the real process's outcome is unknown.

mod driver;

pub use driver::{NilDriver, ProbeReport, ProcessDriver, SystemDriver, DEFAULT_START_GRACE};

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ControlError, Result};
use crate::types::{ProcessState, ProcessStatus};

/// Default bound on a single lifecycle operation.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a single status probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Process controller options.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Where the generated configuration is written; the location the
    /// controlled process reads.
    pub config_path: PathBuf,
    /// Bound on a single lifecycle operation.
    pub op_timeout: Duration,
    /// Bound on a single status probe.
    pub probe_timeout: Duration,
}

impl ControllerOptions {
    /// Create options for the given configuration path.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            op_timeout: DEFAULT_OP_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Set the lifecycle operation timeout.
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Set the probe timeout.
    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }
}

/// Lifecycle controller for the proxy process.
pub struct ProcessController {
    driver: Arc<dyn ProcessDriver>,
    status: Mutex<ProcessStatus>,
    /// Serializes lifecycle commands. Probes only try-lock it.
    op_gate: tokio::sync::Mutex<()>,
    options: ControllerOptions,
    probe_failures: AtomicU64,
}

impl ProcessController {
    /// Create a controller over the given driver.
    pub fn new(driver: Arc<dyn ProcessDriver>, options: ControllerOptions) -> Self {
        Self {
            driver,
            status: Mutex::new(ProcessStatus::stopped()),
            op_gate: tokio::sync::Mutex::new(()),
            options,
            probe_failures: AtomicU64::new(0),
        }
    }

    /// The last observed status.
    pub fn status(&self) -> ProcessStatus {
        self.status.lock().clone()
    }

    /// The current state.
    pub fn state(&self) -> ProcessState {
        self.status.lock().state
    }

    /// Number of failed status probes since startup.
    pub fn probe_failures(&self) -> u64 {
        self.probe_failures.load(Ordering::Relaxed)
    }

    /// Path the generated configuration is written to.
    pub fn config_path(&self) -> &PathBuf {
        &self.options.config_path
    }

    /// Start the process.
    ///
    /// Idempotent against its own target state: starting while Starting or
    /// Running reports the current status instead of failing.
    pub async fn start(&self) -> Result<ProcessStatus> {
        {
            let status = self.status.lock();
            if matches!(
                status.state,
                ProcessState::Starting | ProcessState::Running
            ) {
                return Ok(status.clone());
            }
        }
        let _gate = self
            .op_gate
            .try_lock()
            .map_err(|_| ControlError::OperationInProgress("start"))?;
        self.start_locked().await
    }

    /// Stop the process. Idempotent while Stopped or Stopping.
    pub async fn stop(&self) -> Result<ProcessStatus> {
        {
            let status = self.status.lock();
            if matches!(
                status.state,
                ProcessState::Stopped | ProcessState::Stopping
            ) {
                return Ok(status.clone());
            }
        }
        let _gate = self
            .op_gate
            .try_lock()
            .map_err(|_| ControlError::OperationInProgress("stop"))?;
        self.stop_locked().await
    }

    /// Restart the process: stop, then start.
    ///
    /// Not atomic; observers see Stopping and Starting along the way. From
    /// Stopped this is just a start.
    pub async fn restart(&self) -> Result<ProcessStatus> {
        let _gate = self
            .op_gate
            .try_lock()
            .map_err(|_| ControlError::OperationInProgress("restart"))?;
        self.stop_locked().await?;
        self.start_locked().await
    }

    /// Write the configuration document, then restart if Running.
    ///
    /// A write failure is fatal and happens before any restart. A restart
    /// failure is surfaced but the written configuration stays: on-disk
    /// config and runtime state may diverge, and the divergence is visible
    /// through the reported state.
    pub async fn apply(&self, document: &str) -> Result<ProcessStatus> {
        let _gate = self
            .op_gate
            .try_lock()
            .map_err(|_| ControlError::OperationInProgress("apply"))?;

        self.write_document(document).await?;

        if self.state() == ProcessState::Running {
            self.stop_locked().await?;
            self.start_locked().await
        } else {
            Ok(self.status())
        }
    }

    /// Re-read configuration in place when the driver supports it; degrades
    /// to a full restart otherwise. A no-op unless Running.
    pub async fn reload(&self) -> Result<ProcessStatus> {
        let _gate = self
            .op_gate
            .try_lock()
            .map_err(|_| ControlError::OperationInProgress("reload"))?;

        let (state, pid) = {
            let status = self.status.lock();
            (status.state, status.pid)
        };
        if state != ProcessState::Running {
            return Ok(self.status());
        }

        if self.driver.supports_reload() {
            if let Some(pid) = pid {
                let driver = self.driver.clone();
                self.bounded("reload", async move { driver.reload(pid).await })
                    .await
                    .map_err(|e| {
                        self.mark_crashed();
                        e
                    })?;
                return Ok(self.status());
            }
        }

        self.stop_locked().await?;
        self.start_locked().await
    }

    /// Refresh the observed state from the driver.
    ///
    /// Never blocks on an in-flight lifecycle operation: when one holds the
    /// gate the probe reports the last stable state. Probe failures keep the
    /// last state and are only counted; a Running process observed gone is a
    /// crash signal.
    pub async fn probe(&self) -> ProcessStatus {
        let _gate = match self.op_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => return self.status(),
        };

        match timeout(self.options.probe_timeout, self.driver.poll()).await {
            Ok(Ok(report)) => {
                let mut status = self.status.lock();
                if status.state == ProcessState::Running {
                    if report.running {
                        if report.pid.is_some() {
                            status.pid = report.pid;
                        }
                    } else {
                        warn!("Controlled process exited unexpectedly");
                        status.state = ProcessState::Crashed;
                        status.pid = None;
                        status.version = None;
                    }
                }
            }
            Ok(Err(e)) => {
                self.probe_failures.fetch_add(1, Ordering::Relaxed);
                debug!("Status probe failed: {}", e);
            }
            Err(_) => {
                self.probe_failures.fetch_add(1, Ordering::Relaxed);
                debug!("Status probe timed out");
            }
        }
        self.status()
    }

    async fn start_locked(&self) -> Result<ProcessStatus> {
        if self.state() == ProcessState::Running {
            return Ok(self.status());
        }
        self.set_status(ProcessState::Starting, None, None);

        let driver = self.driver.clone();
        let config_path = self.options.config_path.clone();
        let pid = self
            .bounded("start", async move { driver.spawn(&config_path).await })
            .await
            .map_err(|e| {
                self.mark_crashed();
                e
            })?;

        let driver = self.driver.clone();
        let version = self
            .bounded("start", async move { driver.wait_ready(pid).await })
            .await
            .map_err(|e| {
                self.mark_crashed();
                e
            })?;

        self.set_status(ProcessState::Running, Some(pid), version);
        Ok(self.status())
    }

    async fn stop_locked(&self) -> Result<ProcessStatus> {
        let (state, pid) = {
            let status = self.status.lock();
            (status.state, status.pid)
        };
        if state == ProcessState::Stopped {
            return Ok(self.status());
        }

        self.set_status(ProcessState::Stopping, pid, None);

        // A crashed process left no pid behind; there is nothing to signal.
        if let Some(pid) = pid {
            let driver = self.driver.clone();
            self.bounded("stop", async move { driver.terminate(pid).await })
                .await
                .map_err(|e| {
                    self.mark_crashed();
                    e
                })?;
        }

        self.set_status(ProcessState::Stopped, None, None);
        Ok(self.status())
    }

    /// Write the configuration artifact without touching the process.
    pub async fn write_config(&self, document: &str) -> Result<()> {
        let _gate = self
            .op_gate
            .try_lock()
            .map_err(|_| ControlError::OperationInProgress("write"))?;
        self.write_document(document).await
    }

    async fn write_document(&self, document: &str) -> Result<()> {
        let path = &self.options.config_path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| ControlError::ConfigWrite {
                        path: path.clone(),
                        source,
                    })?;
            }
        }
        tokio::fs::write(path, document)
            .await
            .map_err(|source| ControlError::ConfigWrite {
                path: path.clone(),
                source,
            })
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        match timeout(self.options.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ControlError::ProcessTimeout {
                op,
                timeout_secs: self.options.op_timeout.as_secs(),
            }),
        }
    }

    fn set_status(&self, state: ProcessState, pid: Option<u32>, version: Option<String>) {
        let mut status = self.status.lock();
        status.state = state;
        status.pid = pid;
        status.version = version;
    }

    fn mark_crashed(&self) {
        self.set_status(ProcessState::Crashed, None, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    use async_trait::async_trait;

    /// Scripted driver for exercising the state machine.
    #[derive(Default)]
    struct FakeDriver {
        running: AtomicBool,
        fail_spawn: AtomicBool,
        fail_poll: AtomicBool,
        spawns: AtomicU64,
        terminates: AtomicU64,
        /// When set, `wait_ready` blocks until notified.
        ready_gate: Option<Arc<Notify>>,
    }

    impl FakeDriver {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn gated() -> (Arc<Self>, Arc<Notify>) {
            let gate = Arc::new(Notify::new());
            let driver = Arc::new(Self {
                ready_gate: Some(gate.clone()),
                ..Self::default()
            });
            (driver, gate)
        }

        fn spawns(&self) -> u64 {
            self.spawns.load(Ordering::SeqCst)
        }

        fn terminates(&self) -> u64 {
            self.terminates.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProcessDriver for FakeDriver {
        async fn spawn(&self, _config_path: &Path) -> Result<u32> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            if self.fail_spawn.load(Ordering::SeqCst) {
                return Err(ControlError::Process("spawn refused".to_string()));
            }
            self.running.store(true, Ordering::SeqCst);
            Ok(42)
        }

        async fn wait_ready(&self, _pid: u32) -> Result<Option<String>> {
            if let Some(gate) = &self.ready_gate {
                gate.notified().await;
            }
            Ok(Some("fake 1.0.0".to_string()))
        }

        async fn terminate(&self, _pid: u32) -> Result<()> {
            self.terminates.fetch_add(1, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn poll(&self) -> Result<ProbeReport> {
            if self.fail_poll.load(Ordering::SeqCst) {
                return Err(ControlError::Process("poll refused".to_string()));
            }
            let running = self.running.load(Ordering::SeqCst);
            Ok(ProbeReport {
                running,
                pid: running.then_some(42),
            })
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "routectl-process-{}-{}.json",
            std::process::id(),
            name
        ))
    }

    fn controller(driver: Arc<FakeDriver>, name: &str) -> ProcessController {
        ProcessController::new(driver, ControllerOptions::new(temp_path(name)))
    }

    #[tokio::test]
    async fn test_start_reaches_running() {
        let ctl = controller(FakeDriver::new(), "start");
        let status = ctl.start().await.unwrap();
        assert_eq!(status.state, ProcessState::Running);
        assert_eq!(status.pid, Some(42));
        assert_eq!(status.version.as_deref(), Some("fake 1.0.0"));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_running() {
        let driver = FakeDriver::new();
        let ctl = controller(driver.clone(), "start-idem");
        ctl.start().await.unwrap();

        let status = ctl.start().await.unwrap();
        assert_eq!(status.state, ProcessState::Running);
        assert_eq!(driver.spawns(), 1, "second start must not respawn");
    }

    #[tokio::test]
    async fn test_concurrent_start_during_starting_returns_state() {
        let (driver, gate) = FakeDriver::gated();
        let ctl = Arc::new(controller(driver.clone(), "start-concurrent"));

        let background = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.start().await })
        };

        // Wait for the first start to park in wait_ready.
        while ctl.state() != ProcessState::Starting {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // The concurrent start is a no-op report, not an error.
        let status = ctl.start().await.unwrap();
        assert_eq!(status.state, ProcessState::Starting);
        assert_eq!(driver.spawns(), 1);

        gate.notify_one();
        let status = background.await.unwrap().unwrap();
        assert_eq!(status.state, ProcessState::Running);
    }

    #[tokio::test]
    async fn test_stop_round_trip_and_idempotence() {
        let driver = FakeDriver::new();
        let ctl = controller(driver.clone(), "stop");
        ctl.start().await.unwrap();

        let status = ctl.stop().await.unwrap();
        assert_eq!(status.state, ProcessState::Stopped);
        assert_eq!(status.pid, None);

        // Stopping an already stopped process is a no-op.
        let status = ctl.stop().await.unwrap();
        assert_eq!(status.state, ProcessState::Stopped);
        assert_eq!(driver.terminates(), 1);
    }

    #[tokio::test]
    async fn test_restart_stops_then_starts() {
        let driver = FakeDriver::new();
        let ctl = controller(driver.clone(), "restart");
        ctl.start().await.unwrap();

        let status = ctl.restart().await.unwrap();
        assert_eq!(status.state, ProcessState::Running);
        assert_eq!(driver.spawns(), 2);
        assert_eq!(driver.terminates(), 1);
    }

    #[tokio::test]
    async fn test_restart_from_stopped_just_starts() {
        let driver = FakeDriver::new();
        let ctl = controller(driver.clone(), "restart-stopped");
        let status = ctl.restart().await.unwrap();
        assert_eq!(status.state, ProcessState::Running);
        assert_eq!(driver.terminates(), 0);
    }

    #[tokio::test]
    async fn test_timeout_marks_crashed() {
        let (driver, _gate) = FakeDriver::gated();
        let ctl = ProcessController::new(
            driver,
            ControllerOptions::new(temp_path("timeout")).with_op_timeout(Duration::from_millis(20)),
        );

        let err = ctl.start().await.unwrap_err();
        assert!(matches!(err, ControlError::ProcessTimeout { op: "start", .. }));
        assert_eq!(ctl.state(), ProcessState::Crashed);
    }

    #[tokio::test]
    async fn test_crashed_recovers_via_start() {
        let driver = FakeDriver::new();
        driver.fail_spawn.store(true, Ordering::SeqCst);
        let ctl = controller(driver.clone(), "recover");

        assert!(ctl.start().await.is_err());
        assert_eq!(ctl.state(), ProcessState::Crashed);

        // Manual recovery: Crashed --start()--> Starting --> Running.
        driver.fail_spawn.store(false, Ordering::SeqCst);
        let status = ctl.start().await.unwrap();
        assert_eq!(status.state, ProcessState::Running);
    }

    #[tokio::test]
    async fn test_command_while_operation_in_flight_is_rejected() {
        let (driver, gate) = FakeDriver::gated();
        let ctl = Arc::new(controller(driver, "in-progress"));

        let background = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.start().await })
        };
        while ctl.state() != ProcessState::Starting {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // restart has no same-target no-op, so it must be rejected outright.
        let err = ctl.restart().await.unwrap_err();
        assert!(matches!(err, ControlError::OperationInProgress("restart")));

        gate.notify_one();
        background.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_apply_while_stopped_only_writes() {
        let driver = FakeDriver::new();
        let ctl = controller(driver.clone(), "apply-stopped");
        let status = ctl.apply("{\"route\":{}}").await.unwrap();
        assert_eq!(status.state, ProcessState::Stopped);
        assert_eq!(driver.spawns(), 0);

        let written = std::fs::read_to_string(ctl.config_path()).unwrap();
        assert_eq!(written, "{\"route\":{}}");
    }

    #[tokio::test]
    async fn test_apply_while_running_restarts() {
        let driver = FakeDriver::new();
        let ctl = controller(driver.clone(), "apply-running");
        ctl.start().await.unwrap();

        let status = ctl.apply("{}").await.unwrap();
        assert_eq!(status.state, ProcessState::Running);
        assert_eq!(driver.spawns(), 2);
        assert_eq!(driver.terminates(), 1);
    }

    #[tokio::test]
    async fn test_apply_write_failure_aborts_before_restart() {
        // Parent of the config path is a regular file, so the write must fail.
        let blocker = temp_path("write-blocker");
        std::fs::write(&blocker, "x").unwrap();
        let config_path = blocker.join("config.json");

        let driver = FakeDriver::new();
        let ctl = ProcessController::new(driver.clone(), ControllerOptions::new(config_path));
        ctl.start().await.unwrap();

        let err = ctl.apply("{}").await.unwrap_err();
        assert!(matches!(err, ControlError::ConfigWrite { .. }));

        // Still running; no restart was attempted.
        assert_eq!(ctl.state(), ProcessState::Running);
        assert_eq!(driver.terminates(), 0);
    }

    #[tokio::test]
    async fn test_probe_detects_unexpected_exit() {
        let driver = FakeDriver::new();
        let ctl = controller(driver.clone(), "probe-crash");
        ctl.start().await.unwrap();

        driver.running.store(false, Ordering::SeqCst);

        let status = ctl.probe().await;
        assert_eq!(status.state, ProcessState::Crashed);
        assert_eq!(status.pid, None);
    }

    #[tokio::test]
    async fn test_probe_reports_last_state_during_operation() {
        let (driver, gate) = FakeDriver::gated();
        let ctl = Arc::new(controller(driver, "probe-busy"));

        let background = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.start().await })
        };
        while ctl.state() != ProcessState::Starting {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // The gate is held by the in-flight start; the probe must not wait.
        let status = ctl.probe().await;
        assert_eq!(status.state, ProcessState::Starting);

        gate.notify_one();
        background.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_probe_failure_keeps_state_and_counts() {
        let driver = FakeDriver::new();
        let ctl = controller(driver.clone(), "probe-fail");
        ctl.start().await.unwrap();

        driver.fail_poll.store(true, Ordering::SeqCst);

        let status = ctl.probe().await;
        assert_eq!(status.state, ProcessState::Running);
        assert_eq!(ctl.probe_failures(), 1);
    }

    #[tokio::test]
    async fn test_reload_degrades_to_restart() {
        let driver = FakeDriver::new();
        let ctl = controller(driver.clone(), "reload");
        ctl.start().await.unwrap();

        let status = ctl.reload().await.unwrap();
        assert_eq!(status.state, ProcessState::Running);
        assert_eq!(driver.spawns(), 2);
    }

    #[tokio::test]
    async fn test_reload_is_noop_while_stopped() {
        let driver = FakeDriver::new();
        let ctl = controller(driver.clone(), "reload-stopped");
        let status = ctl.reload().await.unwrap();
        assert_eq!(status.state, ProcessState::Stopped);
        assert_eq!(driver.spawns(), 0);
    }
}
