//! Controlled-process drivers.
//!
//! The driver is the seam between the lifecycle state machine and the real
//! proxy binary. `SystemDriver` launches the actual process; `NilDriver` is
//! an inert stand-in for wiring the engine without a binary present.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::error::{ControlError, Result};

/// Grace period after spawning before the process is considered up.
pub const DEFAULT_START_GRACE: Duration = Duration::from_millis(500);

/// Observation of the controlled process, produced by `poll`.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub running: bool,
    pub pid: Option<u32>,
}

/// Driver interface for the controlled proxy process.
#[async_trait]
pub trait ProcessDriver: Send + Sync {
    /// Launch the process against the given configuration file.
    ///
    /// Returns the pid. The process may not be serving yet; callers follow
    /// up with `wait_ready`.
    async fn spawn(&self, config_path: &Path) -> Result<u32>;

    /// Block until the freshly spawned process is up, returning its version
    /// string when known.
    async fn wait_ready(&self, pid: u32) -> Result<Option<String>>;

    /// Terminate the process and wait for it to exit.
    async fn terminate(&self, pid: u32) -> Result<()>;

    /// Observe the process without affecting it.
    async fn poll(&self) -> Result<ProbeReport>;

    /// Whether the driver can apply a new configuration without a restart.
    fn supports_reload(&self) -> bool {
        false
    }

    /// Ask the process to re-read its configuration in place.
    async fn reload(&self, _pid: u32) -> Result<()> {
        Err(ControlError::Process(
            "Reload not supported by this driver".to_string(),
        ))
    }
}

/// Driver that runs the real proxy binary as a child process.
pub struct SystemDriver {
    binary: PathBuf,
    start_grace: Duration,
    child: Mutex<Option<Child>>,
}

impl SystemDriver {
    /// Create a driver for the given binary.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            start_grace: DEFAULT_START_GRACE,
            child: Mutex::new(None),
        }
    }

    /// Set the startup grace period.
    pub fn with_start_grace(mut self, grace: Duration) -> Self {
        self.start_grace = grace;
        self
    }

    /// Query the binary's version string (`<binary> version`).
    async fn query_version(&self) -> Option<String> {
        let output = Command::new(&self.binary)
            .arg("version")
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let line = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()?
            .trim()
            .to_string();
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }
}

#[async_trait]
impl ProcessDriver for SystemDriver {
    async fn spawn(&self, config_path: &Path) -> Result<u32> {
        let mut guard = self.child.lock().await;

        // Reap a previously tracked child that has already exited.
        if let Some(child) = guard.as_mut() {
            let exited = child
                .try_wait()
                .map_err(|e| ControlError::Process(format!("Failed to query child: {}", e)))?
                .is_some();
            if exited {
                *guard = None;
            } else {
                return Err(ControlError::Process(
                    "A child process is already running".to_string(),
                ));
            }
        }

        let child = Command::new(&self.binary)
            .arg("run")
            .arg("-c")
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                ControlError::Process(format!(
                    "Failed to spawn '{}': {}",
                    self.binary.display(),
                    e
                ))
            })?;
        let pid = child
            .id()
            .ok_or_else(|| ControlError::Process("Spawned process has no pid".to_string()))?;
        *guard = Some(child);
        Ok(pid)
    }

    async fn wait_ready(&self, _pid: u32) -> Result<Option<String>> {
        // The binary has no readiness signal; give it a grace period, then
        // confirm it did not exit immediately (bad config, occupied port).
        tokio::time::sleep(self.start_grace).await;

        let mut guard = self.child.lock().await;
        let child = guard
            .as_mut()
            .ok_or_else(|| ControlError::Process("No child process".to_string()))?;
        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                *guard = None;
                return Err(ControlError::Process(format!(
                    "Process exited during startup: {}",
                    status
                )));
            }
            Err(e) => {
                return Err(ControlError::Process(format!(
                    "Failed to query child: {}",
                    e
                )));
            }
        }
        drop(guard);

        Ok(self.query_version().await)
    }

    async fn terminate(&self, _pid: u32) -> Result<()> {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            child
                .kill()
                .await
                .map_err(|e| ControlError::Process(format!("Failed to kill child: {}", e)))?;
        }
        Ok(())
    }

    async fn poll(&self) -> Result<ProbeReport> {
        let mut guard = self.child.lock().await;
        let child = match guard.as_mut() {
            Some(child) => child,
            None => return Ok(ProbeReport::default()),
        };
        let pid = child.id();
        match child.try_wait() {
            Ok(None) => Ok(ProbeReport { running: true, pid }),
            Ok(Some(_)) => {
                *guard = None;
                Ok(ProbeReport::default())
            }
            Err(e) => Err(ControlError::Process(format!(
                "Failed to query child: {}",
                e
            ))),
        }
    }
}

/// Inert driver that pretends to manage a process.
///
/// Useful for wiring the engine when no proxy binary is installed.
#[derive(Default)]
pub struct NilDriver {
    running: AtomicBool,
}

impl NilDriver {
    /// Create a new nil driver.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessDriver for NilDriver {
    async fn spawn(&self, _config_path: &Path) -> Result<u32> {
        self.running.store(true, Ordering::SeqCst);
        Ok(0)
    }

    async fn wait_ready(&self, _pid: u32) -> Result<Option<String>> {
        Ok(None)
    }

    async fn terminate(&self, _pid: u32) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn poll(&self) -> Result<ProbeReport> {
        Ok(ProbeReport {
            running: self.running.load(Ordering::SeqCst),
            pid: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nil_driver_round_trip() {
        let driver = NilDriver::new();
        assert!(!driver.poll().await.unwrap().running);

        driver.spawn(Path::new("/dev/null")).await.unwrap();
        assert!(driver.poll().await.unwrap().running);

        driver.terminate(0).await.unwrap();
        assert!(!driver.poll().await.unwrap().running);
    }

    #[tokio::test]
    async fn test_nil_driver_does_not_support_reload() {
        let driver = NilDriver::new();
        assert!(!driver.supports_reload());
        assert!(matches!(
            driver.reload(0).await,
            Err(ControlError::Process(_))
        ));
    }
}
