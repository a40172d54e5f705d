//! Process-tree termination.
//!
//! Termination is a two-step escalation: a cooperative request first, then,
//! if anything in the tree is still alive after the grace window, a forced
//! kill. The platform mechanics live behind [`KillStrategy`] so the
//! escalation itself can be exercised without real processes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::debug;
use tracing::warn;

/// Whether a graceful step already finished the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// The tree was asked to stop; check again after the grace window.
    Pending,
    /// Nothing left to escalate.
    Complete,
}

#[async_trait]
pub trait KillStrategy: Send + Sync + fmt::Debug {
    /// Cooperative stop request for the tree rooted at `pid`.
    async fn graceful(&self, pid: u32) -> Escalation;

    /// Unconditional kill of the tree rooted at `pid`.
    async fn forceful(&self, pid: u32);

    /// True while any member of the tree may still be running.
    fn is_alive(&self, pid: u32) -> bool;

    /// Best-effort kill of stragglers once the root has exited.
    fn sweep(&self, pid: u32);
}

#[derive(Debug, Clone)]
pub struct Terminator {
    strategy: Arc<dyn KillStrategy>,
    grace: Duration,
}

impl Terminator {
    pub fn new(strategy: Arc<dyn KillStrategy>, grace: Duration) -> Self {
        Self { strategy, grace }
    }

    /// Terminator using the platform's native tree-kill mechanism.
    pub fn platform(grace: Duration) -> Self {
        Self::new(platform_strategy(), grace)
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub async fn terminate(&self, pid: u32) {
        if self.strategy.graceful(pid).await == Escalation::Complete {
            return;
        }
        sleep(self.grace).await;
        if self.strategy.is_alive(pid) {
            warn!(
                pid,
                grace_ms = self.grace.as_millis() as u64,
                "engine still alive after grace period; killing process tree"
            );
            self.strategy.forceful(pid).await;
        }
    }

    pub fn sweep(&self, pid: u32) {
        self.strategy.sweep(pid);
    }
}

#[cfg(unix)]
pub fn platform_strategy() -> Arc<dyn KillStrategy> {
    Arc::new(ProcessGroupStrategy)
}

#[cfg(windows)]
pub fn platform_strategy() -> Arc<dyn KillStrategy> {
    Arc::new(TaskkillStrategy)
}

/// Signals the process group led by the engine. The engine is spawned as a
/// group leader, so its pid doubles as the group id.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessGroupStrategy;

#[cfg(unix)]
impl ProcessGroupStrategy {
    fn signal(pid: u32, signal: libc::c_int) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        if unsafe { libc::kill(-pid, signal) } == 0 {
            return true;
        }
        // No such group: the engine may not have become a group leader.
        unsafe { libc::kill(pid, signal) == 0 }
    }
}

#[cfg(unix)]
#[async_trait]
impl KillStrategy for ProcessGroupStrategy {
    async fn graceful(&self, pid: u32) -> Escalation {
        if Self::signal(pid, libc::SIGTERM) {
            debug!(pid, "sent SIGTERM to engine process group");
            Escalation::Pending
        } else {
            Escalation::Complete
        }
    }

    async fn forceful(&self, pid: u32) {
        if Self::signal(pid, libc::SIGKILL) {
            debug!(pid, "sent SIGKILL to engine process group");
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        if unsafe { libc::kill(-pid, 0) } == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    fn sweep(&self, pid: u32) {
        if self.is_alive(pid) && Self::signal(pid, libc::SIGKILL) {
            debug!(pid, "killed leftover processes in engine group");
        }
    }
}

/// Kills the engine tree with `taskkill /T /F`.
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskkillStrategy;

#[cfg(windows)]
impl TaskkillStrategy {
    async fn taskkill(pid: u32) {
        let result = tokio::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) if status.success() => debug!(pid, "taskkill terminated engine tree"),
            Ok(status) => debug!(pid, %status, "taskkill reported failure"),
            Err(err) => warn!(pid, error = %err, "failed to run taskkill"),
        }
    }
}

#[cfg(windows)]
#[async_trait]
impl KillStrategy for TaskkillStrategy {
    async fn graceful(&self, pid: u32) -> Escalation {
        Self::taskkill(pid).await;
        Escalation::Complete
    }

    async fn forceful(&self, pid: u32) {
        Self::taskkill(pid).await;
    }

    fn is_alive(&self, _pid: u32) -> bool {
        false
    }

    // TODO: assign the engine to a job object so orphans can be swept here.
    fn sweep(&self, _pid: u32) {}
}
