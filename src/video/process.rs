//! Ownership and teardown of external tool processes
//!
//! Every ffmpeg/ffprobe child spawned by a job is wrapped in a
//! [`ManagedChild`] and recorded in the job's [`ProcessLedger`]. Teardown is
//! terminate, a bounded grace period, then a forceful kill.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// Live external processes, keyed by pid
#[derive(Debug, Clone, Default)]
pub struct ProcessLedger {
    inner: Arc<Mutex<HashMap<u32, &'static str>>>,
}

impl ProcessLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, pid: u32, label: &'static str) {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(pid, label);
    }

    fn release(&self, pid: u32) {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&pid);
    }

    /// Snapshot of the processes that have not been reaped yet
    pub fn live(&self) -> Vec<(u32, &'static str)> {
        let guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut live: Vec<_> = guard.iter().map(|(pid, label)| (*pid, *label)).collect();
        live.sort_unstable();
        live
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_empty()
    }
}

/// How a bounded wait on a child ended
#[derive(Debug)]
pub enum ChildExit {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// An external process that is always reaped
pub struct ManagedChild {
    child: Child,
    label: &'static str,
    pid: Option<u32>,
    grace: Duration,
    ledger: ProcessLedger,
    reaped: bool,
}

impl ManagedChild {
    /// Spawn `command` and register it in `ledger`
    pub fn spawn(
        mut command: Command,
        label: &'static str,
        grace: Duration,
        ledger: &ProcessLedger,
    ) -> std::io::Result<Self> {
        command.kill_on_drop(true);
        let child = command.spawn()?;
        let pid = child.id();

        if let Some(pid) = pid {
            ledger.register(pid, label);
        }
        debug!(label, pid, "spawned external process");

        Ok(Self {
            child,
            label,
            pid,
            grace,
            ledger: ledger.clone(),
            reaped: false,
        })
    }

    /// Spawn a one-shot tool with no pipes attached
    pub fn spawn_quiet(
        program: &std::path::Path,
        args: &[String],
        label: &'static str,
        grace: Duration,
        ledger: &ProcessLedger,
    ) -> std::io::Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        Self::spawn(command, label, grace, ledger)
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// True while the process has not exited
    pub fn is_running(&mut self) -> bool {
        if self.reaped {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(_)) => {
                self.mark_reaped();
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    /// Wait up to `limit` for a natural exit; tear the process down otherwise
    pub async fn wait_or_kill(&mut self, limit: Duration) -> std::io::Result<Option<ExitStatus>> {
        match tokio::time::timeout(limit, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.mark_reaped();
                Ok(Some(status))
            }
            Ok(Err(e)) => {
                self.shutdown().await;
                Err(e)
            }
            Err(_) => {
                warn!(label = self.label, pid = self.pid, ?limit, "process did not exit in time");
                self.shutdown().await;
                Ok(None)
            }
        }
    }

    /// Wait for exit, bounded by `limit` and interruptible by `cancel`
    pub async fn wait_cancellable(
        &mut self,
        limit: Duration,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> std::io::Result<ChildExit> {
        enum Waited {
            Done(std::io::Result<ExitStatus>),
            Elapsed,
            Cancelled,
        }

        let waited = tokio::select! {
            result = tokio::time::timeout(limit, self.child.wait()) => match result {
                Ok(done) => Waited::Done(done),
                Err(_) => Waited::Elapsed,
            },
            _ = cancel.cancelled() => Waited::Cancelled,
        };

        match waited {
            Waited::Done(Ok(status)) => {
                self.mark_reaped();
                Ok(ChildExit::Exited(status))
            }
            Waited::Done(Err(e)) => {
                self.shutdown().await;
                Err(e)
            }
            Waited::Elapsed => {
                warn!(label = self.label, pid = self.pid, ?limit, "process timed out");
                self.shutdown().await;
                Ok(ChildExit::TimedOut)
            }
            Waited::Cancelled => {
                debug!(label = self.label, pid = self.pid, "wait interrupted by cancellation");
                self.shutdown().await;
                Ok(ChildExit::Cancelled)
            }
        }
    }

    /// Terminate, wait the grace period, then kill. Idempotent.
    pub async fn shutdown(&mut self) {
        if self.reaped {
            return;
        }
        if let Ok(Some(_)) = self.child.try_wait() {
            self.mark_reaped();
            return;
        }

        self.terminate();
        if tokio::time::timeout(self.grace, self.child.wait()).await.is_err() {
            warn!(
                label = self.label,
                pid = self.pid,
                grace = ?self.grace,
                "process ignored terminate; killing"
            );
            if let Err(e) = self.child.kill().await {
                warn!(label = self.label, pid = self.pid, "kill failed: {}", e);
            }
        }
        self.mark_reaped();
    }

    #[cfg(unix)]
    fn terminate(&mut self) {
        match self.pid {
            Some(pid) => {
                // SAFETY: pid belongs to our unreaped child, so it cannot have been recycled
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
            None => {
                let _ = self.child.start_kill();
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        let _ = self.child.start_kill();
    }

    fn mark_reaped(&mut self) {
        if self.reaped {
            return;
        }
        self.reaped = true;
        if let Some(pid) = self.pid {
            self.ledger.release(pid);
        }
        debug!(label = self.label, pid = self.pid, "external process reaped");
    }
}

impl Drop for ManagedChild {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Ok(Some(_)) = self.child.try_wait() {
            self.mark_reaped();
            return;
        }
        warn!(label = self.label, pid = self.pid, "external process dropped while running; killing");
        let _ = self.child.start_kill();
        self.mark_reaped();
    }
}
