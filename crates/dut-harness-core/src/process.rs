//! Low-level process liveness and signalling, behind a trait so the
//! supervisor can be exercised without killing real processes.

use std::fs;
use std::io;

/// Signals the supervisor may deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
}

/// Observed state of a PID at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    /// Exited but not yet reaped by its parent. Counts as stopped for
    /// supervision purposes: it can never run again.
    Zombie,
    NotFound,
    NoPermission,
}

impl ProcessStatus {
    pub fn is_stopped(&self) -> bool {
        matches!(self, ProcessStatus::Zombie | ProcessStatus::NotFound)
    }
}

pub trait ProcessControl: Send + Sync {
    fn status(&self, pid: u32) -> io::Result<ProcessStatus>;

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()>;
}

/// Real implementation: `/proc/<pid>/stat` for state (so zombies are
/// distinguishable from running processes) with `kill(pid, 0)` as the
/// fallback probe, and `libc::kill` for delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcesses;

impl ProcessControl for SystemProcesses {
    fn status(&self, pid: u32) -> io::Result<ProcessStatus> {
        match fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => Ok(match stat_state(&stat) {
                Some('Z') | Some('X') => ProcessStatus::Zombie,
                Some(_) => ProcessStatus::Running,
                None => ProcessStatus::Running,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ProcessStatus::NotFound),
            Err(_) => probe_with_kill(pid),
        }
    }

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        let pid_t: libc::pid_t = pid
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "PID out of range"))?;

        let sig = match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };

        let result = unsafe { libc::kill(pid_t, sig) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// State character from `/proc/<pid>/stat`, the field after `(comm)`.
fn stat_state(stat: &str) -> Option<char> {
    let close = stat.rfind(')')?;
    stat.get(close + 2..)?.chars().next()
}

fn probe_with_kill(pid: u32) -> io::Result<ProcessStatus> {
    let pid_t: libc::pid_t = pid
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "PID out of range"))?;

    let result = unsafe { libc::kill(pid_t, 0) };
    if result == 0 {
        return Ok(ProcessStatus::Running);
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(ProcessStatus::NotFound),
        Some(libc::EPERM) => Ok(ProcessStatus::NoPermission),
        _ => Err(err),
    }
}
