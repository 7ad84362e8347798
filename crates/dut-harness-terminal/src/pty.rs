use std::io;
use std::io::Read;
use std::io::Write;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::Mutex;

use portable_pty::Child;
use portable_pty::CommandBuilder;
use portable_pty::MasterPty;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use tracing::debug;

use dut_harness_common::mutex_lock_or_recover;

use crate::error::PtyError;

/// Signal delivered to the child's whole process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSignal {
    Term,
    Kill,
}

/// A child process attached to a pseudo-terminal.
///
/// Dropping the handle force-kills a child that is still running; orderly
/// teardown (group signal plus supervised wait) is the caller's job.
///
/// The child is spawned as the session leader of its own process group
/// (the PTY slave side calls `setsid`), so group signals reach every
/// descendant it forks, not just the immediate child.
pub struct PtyHandle {
    // Held so the PTY stays open for the handle's lifetime. Wrapped in a
    // Mutex only so the handle is Sync (the field is never accessed).
    #[allow(dead_code)]
    master: Mutex<Box<dyn MasterPty + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    pid: Option<u32>,
    reader: Arc<Mutex<Box<dyn Read + Send>>>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    reader_fd: RawFd,
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        if self.is_running() {
            let mut child = mutex_lock_or_recover(&self.child);
            let _ = child.kill();
        }
    }
}

impl PtyHandle {
    pub fn spawn(
        program: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let size = PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(size)
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        let pid = child.process_id();
        debug!(program, pid, "spawned PTY child");

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let reader_fd = pair
            .master
            .as_raw_fd()
            .ok_or_else(|| PtyError::Open("failed to get master fd".to_string()))?;

        set_non_blocking(reader_fd)?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Open(e.to_string()))?;

        Ok(Self {
            master: Mutex::new(pair.master),
            child: Mutex::new(child),
            pid,
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
            reader_fd,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Polls (and reaps) the child. `false` once it has exited.
    pub fn is_running(&self) -> bool {
        let mut child = mutex_lock_or_recover(&self.child);
        child
            .try_wait()
            .map(|status| status.is_none())
            .unwrap_or(false)
    }

    pub fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if data.is_empty() {
            return Ok(());
        }

        let mut writer = mutex_lock_or_recover(&self.writer);
        let mut offset = 0;
        while offset < data.len() {
            match writer.write(&data[offset..]) {
                Ok(0) => {
                    return Err(PtyError::Write(
                        "write returned 0 bytes, PTY closed".to_string(),
                    ));
                }
                Ok(n) => offset += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    wait_writable(self.reader_fd)?;
                }
                Err(e) => return Err(PtyError::Write(e.to_string())),
            }
        }
        Ok(())
    }

    /// Reads whatever is available within `timeout_ms`, `Ok(0)` on timeout
    /// or hangup with nothing buffered.
    pub fn try_read(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, PtyError> {
        if buf.is_empty() {
            return Ok(0);
        }

        let ready = wait_readable(self.reader_fd, timeout_ms)?;
        if !ready {
            return Ok(0);
        }

        let mut reader = mutex_lock_or_recover(&self.reader);
        let mut total = 0;
        loop {
            match reader.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    if total == buf.len() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(PtyError::Read(e.to_string())),
            }
        }

        Ok(total)
    }

    /// Signals the child's process group. A group that is already gone
    /// (ESRCH) is not an error: the processes we wanted dead are dead.
    pub fn signal_group(&self, signal: GroupSignal) -> Result<(), PtyError> {
        let Some(pid) = self.pid() else {
            return Ok(());
        };
        let pgid: libc::pid_t = pid
            .try_into()
            .map_err(|_| PtyError::Signal("PID out of range".to_string()))?;

        let sig = match signal {
            GroupSignal::Term => libc::SIGTERM,
            GroupSignal::Kill => libc::SIGKILL,
        };

        let result = unsafe { libc::killpg(pgid, sig) };
        if result == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Ok(()),
            _ => Err(PtyError::Signal(err.to_string())),
        }
    }
}

fn set_non_blocking(fd: RawFd) -> Result<(), PtyError> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(PtyError::Open(io::Error::last_os_error().to_string()));
    }

    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }

    let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if result < 0 {
        return Err(PtyError::Open(io::Error::last_os_error().to_string()));
    }

    Ok(())
}

fn wait_readable(fd: RawFd, timeout_ms: i32) -> Result<bool, PtyError> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if result < 0 {
        return Err(PtyError::Read(io::Error::last_os_error().to_string()));
    }
    if result == 0 {
        return Ok(false);
    }

    if pollfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
        return Err(PtyError::Read("poll error on PTY".to_string()));
    }

    // A hung-up PTY may still have buffered output; only report "nothing"
    // when POLLIN is absent.
    if pollfd.revents & libc::POLLHUP != 0 && pollfd.revents & libc::POLLIN == 0 {
        return Ok(false);
    }

    Ok(pollfd.revents & libc::POLLIN != 0)
}

fn wait_writable(fd: RawFd) -> Result<(), PtyError> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };

    let result = unsafe { libc::poll(&mut pollfd, 1, -1) };
    if result < 0 {
        return Err(PtyError::Write(io::Error::last_os_error().to_string()));
    }

    if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        return Err(PtyError::Write("poll error on PTY".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_and_read() {
        let handle =
            PtyHandle::spawn("echo", &["hello".to_string()], &[]).expect("spawn echo");
        let mut buf = [0u8; 256];
        let mut out = Vec::new();
        for _ in 0..50 {
            let n = handle.try_read(&mut buf, 100).expect("read");
            out.extend_from_slice(&buf[..n]);
            if String::from_utf8_lossy(&out).contains("hello") {
                return;
            }
        }
        panic!("never saw echo output: {:?}", String::from_utf8_lossy(&out));
    }

    #[test]
    fn test_spawn_missing_program_fails() {
        let err = PtyHandle::spawn("definitely-not-a-real-program-xyz", &[], &[]);
        assert!(matches!(err, Err(PtyError::Spawn(_))));
    }

    #[test]
    fn test_signal_group_kills_child() {
        let handle = PtyHandle::spawn("sleep", &["30".to_string()], &[]).expect("spawn");
        assert!(handle.is_running());
        handle.signal_group(GroupSignal::Kill).expect("signal");
        // Reap and confirm exit.
        for _ in 0..50 {
            if !handle.is_running() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        panic!("child survived SIGKILL to its group");
    }

    #[test]
    fn test_signal_group_after_exit_is_ok() {
        let handle = PtyHandle::spawn("true", &[], &[]).expect("spawn");
        for _ in 0..50 {
            if !handle.is_running() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert!(handle.signal_group(GroupSignal::Term).is_ok());
    }

    #[test]
    fn test_env_reaches_child() {
        let handle = PtyHandle::spawn(
            "sh",
            &["-c".to_string(), "echo marker-$DUT_TEST_VAR".to_string()],
            &[("DUT_TEST_VAR".to_string(), "42".to_string())],
        )
        .expect("spawn");
        let mut buf = [0u8; 256];
        let mut out = Vec::new();
        for _ in 0..50 {
            let n = handle.try_read(&mut buf, 100).expect("read");
            out.extend_from_slice(&buf[..n]);
            if String::from_utf8_lossy(&out).contains("marker-42") {
                return;
            }
        }
        panic!("env var did not reach child");
    }
}
