//! Confirms that every process in a snapshot has actually stopped,
//! escalating to a forced kill when necessary.
//!
//! This layer never asks nicely: callers are expected to have requested an
//! orderly shutdown through the protocol (or a group signal) already, and
//! the supervisor is the safety net behind that.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::warn;

use dut_harness_common::Deadline;

use crate::error::HarnessError;
use crate::process::ProcessControl;
use crate::process::Signal;
use crate::process::SystemProcesses;
use crate::sleeper::RealSleeper;
use crate::sleeper::Sleeper;
use crate::tree::ProcessHandle;
use crate::tree::ProcessTreeSnapshot;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of one supervision pass. Partial results are preserved: the
/// survivors are listed even when `all_stopped` is false.
#[derive(Debug, Clone)]
pub struct SupervisionReport {
    pub all_stopped: bool,
    pub still_running: Vec<ProcessHandle>,
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    control: Arc<dyn ProcessControl>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::system()
    }
}

impl ProcessSupervisor {
    pub fn system() -> Self {
        Self {
            control: Arc::new(SystemProcesses),
            sleeper: Arc::new(RealSleeper),
        }
    }

    pub fn with_control(control: Arc<dyn ProcessControl>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { control, sleeper }
    }

    /// Lenient form: verify each process in the snapshot independently,
    /// kill what still runs, wait up to `timeout` per survivor, and report.
    /// Never raises over leftover processes; the report is the contract.
    /// A vanished PID counts as stopped (it may even have been reused).
    pub fn ensure_stopped(
        &self,
        snapshot: &ProcessTreeSnapshot,
        timeout: Duration,
    ) -> SupervisionReport {
        let mut still_running = Vec::new();

        for handle in snapshot.iter() {
            if self.is_stopped(handle.pid) {
                continue;
            }

            debug!(pid = handle.pid, comm = %handle.comm, "forcing kill");
            if let Err(e) = self.control.signal(handle.pid, Signal::Kill) {
                // ESRCH between the check and the kill is success.
                debug!(pid = handle.pid, error = %e, "kill failed");
            }

            let deadline = Deadline::after(timeout);
            let mut stopped = self.is_stopped(handle.pid);
            while !stopped && !deadline.expired() {
                self.sleeper.sleep(POLL_INTERVAL);
                stopped = self.is_stopped(handle.pid);
            }

            if !stopped {
                let status = self.control.status(handle.pid);
                warn!(
                    pid = handle.pid,
                    comm = %handle.comm,
                    ?status,
                    "process still running after forced kill"
                );
                still_running.push(handle.clone());
            }
        }

        SupervisionReport {
            all_stopped: still_running.is_empty(),
            still_running,
        }
    }

    /// Strict form: as `ensure_stopped`, but leftover processes become a
    /// hard `Supervision` failure. For contexts where an unclean tree must
    /// halt the caller.
    pub fn ensure_stopped_or_fail(
        &self,
        snapshot: &ProcessTreeSnapshot,
        timeout: Duration,
    ) -> Result<(), HarnessError> {
        let report = self.ensure_stopped(snapshot, timeout);
        if report.all_stopped {
            Ok(())
        } else {
            Err(HarnessError::Supervision {
                still_running: report.still_running,
            })
        }
    }

    fn is_stopped(&self, pid: u32) -> bool {
        match self.control.status(pid) {
            Ok(status) => status.is_stopped(),
            Err(e) => {
                debug!(pid, error = %e, "status probe failed, assuming stopped");
                true
            }
        }
    }
}
