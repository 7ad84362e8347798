//! One spawned device child on a PTY, with pattern-matched reads and a
//! teardown discipline that supervises the whole process tree captured at
//! spawn time.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::debug;
use tracing::warn;

use dut_harness_common::Deadline;
use dut_harness_terminal::GroupSignal;
use dut_harness_terminal::PtyHandle;
use dut_harness_terminal::TransportClaim;
use dut_harness_terminal::TransportRegistry;

use crate::env::Environment;
use crate::error::HarnessError;
use crate::supervisor::ProcessSupervisor;
use crate::supervisor::SupervisionReport;
use crate::tree::ProcessTreeSnapshot;

/// Bound on the supervised wait during teardown. Teardown is a safety net
/// behind an orderly shutdown request, so a short bound is enough.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Poll granularity for blocking reads.
const READ_POLL: Duration = Duration::from_millis(100);

/// What a blocking read is waiting for.
#[derive(Debug, Clone)]
pub enum Expect {
    Literal(String),
    Pattern(Regex),
}

impl Expect {
    pub fn literal(text: &str) -> Self {
        Expect::Literal(text.to_string())
    }

    pub fn pattern(pattern: &str) -> Result<Self, HarnessError> {
        Ok(Expect::Pattern(Regex::new(pattern)?))
    }

    /// Byte offset just past the first match in `haystack`, if any.
    fn find_end(&self, haystack: &str) -> Option<usize> {
        match self {
            Expect::Literal(text) => haystack.find(text.as_str()).map(|at| at + text.len()),
            Expect::Pattern(regex) => regex.find(haystack).map(|m| m.end()),
        }
    }

    fn describe(&self) -> String {
        match self {
            Expect::Literal(text) => format!("literal {text:?}"),
            Expect::Pattern(regex) => format!("pattern /{}/", regex.as_str()),
        }
    }
}

/// A command session over one spawned child.
///
/// Owns the root process handle, the duplex line channel, a configured
/// default timeout, and the process tree snapshot captured at spawn time.
/// `close()` is the scoped teardown; it runs exactly once per session no
/// matter how the enclosing scope exits (`Drop` is the backstop for panics
/// and cancellation).
pub struct CommandSession {
    pty: Arc<PtyHandle>,
    snapshot: ProcessTreeSnapshot,
    supervisor: ProcessSupervisor,
    timeout: Duration,
    buffer: String,
    echo: Option<Box<dyn Write + Send>>,
    claim: Option<TransportClaim>,
    closed: bool,
}

impl CommandSession {
    /// Spawns `command` through the shell on a fresh PTY, with `env` copied
    /// into the child's environment, and captures the process tree snapshot
    /// for later supervision.
    pub fn spawn(
        command: &str,
        env: &Environment,
        timeout: Duration,
    ) -> Result<Self, HarnessError> {
        Self::spawn_inner(command, env, timeout, None)
    }

    /// As `spawn`, but claims the transport named by `env`'s `PORT` in
    /// `registry` first, so two sessions never share a serial device. The
    /// claim is released at teardown (normal or abnormal).
    pub fn spawn_on(
        registry: &TransportRegistry,
        command: &str,
        env: &Environment,
        timeout: Duration,
    ) -> Result<Self, HarnessError> {
        let claim = match env.port() {
            Some(port) => Some(registry.claim(port)?),
            None => None,
        };
        Self::spawn_inner(command, env, timeout, claim)
    }

    fn spawn_inner(
        command: &str,
        env: &Environment,
        timeout: Duration,
        claim: Option<TransportClaim>,
    ) -> Result<Self, HarnessError> {
        let args = ["-c".to_string(), command.to_string()];
        let pty = PtyHandle::spawn("sh", &args, &env.as_pairs())?;
        let snapshot = ProcessTreeSnapshot::capture(pty.pid());
        debug!(command, pids = ?snapshot.pids(), "session spawned");

        Ok(Self {
            pty: Arc::new(pty),
            snapshot,
            supervisor: ProcessSupervisor::system(),
            timeout,
            buffer: String::new(),
            echo: None,
            claim,
            closed: false,
        })
    }

    /// Attaches a transcript sink; all raw traffic in both directions is
    /// mirrored to it.
    pub fn set_echo(&mut self, sink: Box<dyn Write + Send>) {
        self.echo = Some(sink);
    }

    pub fn pid(&self) -> Option<u32> {
        self.pty.pid()
    }

    pub fn is_running(&self) -> bool {
        self.pty.is_running()
    }

    /// Session-wide default read timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn snapshot(&self) -> &ProcessTreeSnapshot {
        &self.snapshot
    }

    /// Shared raw channel for interactive front-ends. The forwarding loops
    /// built on this are fire-and-forget; they are abandoned, not joined,
    /// when the session closes.
    pub fn raw_channel(&self) -> Arc<PtyHandle> {
        self.pty.clone()
    }

    /// Writes `text` plus the line terminator. Does not wait for any
    /// response; that is the caller's job via `read_until`.
    pub fn send_line(&mut self, text: &str) -> Result<(), HarnessError> {
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        self.pty.write(line.as_bytes())?;
        self.mirror(&line);
        Ok(())
    }

    /// Blocks until the unconsumed transcript matches `expect` or `timeout`
    /// elapses. On a match, consumes the stream up through the match end
    /// and returns the consumed text, so sequential calls read forward
    /// monotonically; backward matches are impossible by construction. On
    /// timeout, fails with `ExpectTimeout` carrying everything accumulated
    /// but not yet matched.
    pub fn read_until(
        &mut self,
        expect: &Expect,
        timeout: Duration,
    ) -> Result<String, HarnessError> {
        let deadline = Deadline::after(timeout);
        let mut chunk = [0u8; 4096];

        loop {
            if let Some(end) = expect.find_end(&self.buffer) {
                let consumed: String = self.buffer.drain(..end).collect();
                return Ok(consumed);
            }

            if deadline.expired() {
                return Err(HarnessError::ExpectTimeout {
                    pattern: expect.describe(),
                    transcript: self.buffer.clone(),
                });
            }

            let poll = deadline.remaining().min(READ_POLL);
            let n = self.pty.try_read(&mut chunk, poll.as_millis() as i32)?;
            if n > 0 {
                let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                self.mirror(&text);
                self.buffer.push_str(&text);
            }
        }
    }

    /// Reads one line, with the terminator (and any `\r`) trimmed.
    pub fn read_line(&mut self, timeout: Duration) -> Result<String, HarnessError> {
        let consumed = self.read_until(&Expect::literal("\n"), timeout)?;
        let line = consumed.strip_suffix('\n').unwrap_or(&consumed);
        let line = line.strip_suffix('\r').unwrap_or(line);
        Ok(line.to_string())
    }

    /// Scoped teardown: signal the whole process group politely, then
    /// verify every process in the spawn-time snapshot individually,
    /// escalating to a forced kill. Idempotent, and never raises: an
    /// error already in flight on the caller's side keeps priority, so
    /// problems here are at most logged.
    pub fn close(&mut self) -> SupervisionReport {
        if self.closed {
            return SupervisionReport {
                all_stopped: true,
                still_running: Vec::new(),
            };
        }
        self.closed = true;

        if let Err(e) = self.pty.signal_group(GroupSignal::Term) {
            debug!(error = %e, "group signal at teardown failed");
        }
        // Reap the root if it already exited, so it does not linger as a
        // zombie under a live harness process.
        self.pty.is_running();

        let report = self
            .supervisor
            .ensure_stopped(&self.snapshot, TEARDOWN_TIMEOUT);
        if !report.all_stopped {
            warn!(
                survivors = ?report.still_running.iter().map(|h| h.to_string()).collect::<Vec<_>>(),
                "session teardown left processes running"
            );
        }
        self.pty.is_running();
        self.claim = None;
        report
    }
}

impl Drop for CommandSession {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

impl CommandSession {
    fn mirror(&mut self, text: &str) {
        if let Some(sink) = self.echo.as_mut() {
            let _ = sink.write_all(text.as_bytes());
            let _ = sink.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessControl;
    use crate::process::SystemProcesses;

    fn no_env() -> Environment {
        Environment::new()
    }

    #[test]
    fn test_read_until_literal() {
        let mut session = CommandSession::spawn(
            "echo booted; cat",
            &no_env(),
            Duration::from_secs(5),
        )
        .expect("spawn");
        let consumed = session
            .read_until(&Expect::literal("booted"), Duration::from_secs(5))
            .expect("match");
        assert!(consumed.ends_with("booted"));
        session.close();
    }

    #[test]
    fn test_read_until_pattern() {
        let mut session = CommandSession::spawn(
            "echo 'version 1.42'; cat",
            &no_env(),
            Duration::from_secs(5),
        )
        .expect("spawn");
        let expect = Expect::pattern(r"version \d+\.\d+").expect("regex");
        session
            .read_until(&expect, Duration::from_secs(5))
            .expect("match");
        session.close();
    }

    #[test]
    fn test_reads_consume_forward_only() {
        let mut session = CommandSession::spawn(
            "echo one two three; cat",
            &no_env(),
            Duration::from_secs(5),
        )
        .expect("spawn");
        session
            .read_until(&Expect::literal("two"), Duration::from_secs(5))
            .expect("forward match");
        // "one" was consumed along with "two"; matching backward must fail.
        let err = session
            .read_until(&Expect::literal("one"), Duration::from_millis(300))
            .unwrap_err();
        assert!(err.is_expect_timeout());
        session.close();
    }

    #[test]
    fn test_timeout_carries_transcript() {
        let mut session = CommandSession::spawn(
            "echo some boot banner; cat",
            &no_env(),
            Duration::from_secs(5),
        )
        .expect("spawn");
        let err = session
            .read_until(&Expect::literal("never-appears"), Duration::from_millis(500))
            .unwrap_err();
        assert!(err.transcript().contains("some boot banner"));
        session.close();
    }

    #[test]
    fn test_send_line_round_trip() {
        let mut session =
            CommandSession::spawn("cat", &no_env(), Duration::from_secs(5)).expect("spawn");
        session.send_line("hello device").expect("send");
        session
            .read_until(&Expect::literal("hello device"), Duration::from_secs(5))
            .expect("echoed back");
        session.close();
    }

    #[test]
    fn test_close_stops_whole_tree() {
        let mut session = CommandSession::spawn(
            "sleep 30 & sleep 30 & wait",
            &no_env(),
            Duration::from_secs(5),
        )
        .expect("spawn");
        std::thread::sleep(Duration::from_millis(300));
        let pids = ProcessTreeSnapshot::capture(session.pid()).pids();
        assert!(!pids.is_empty());

        let report = session.close();
        assert!(report.all_stopped);

        let control = SystemProcesses;
        for pid in pids {
            let status = control.status(pid).expect("status");
            assert!(status.is_stopped(), "pid {pid} still {status:?}");
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session =
            CommandSession::spawn("sleep 30", &no_env(), Duration::from_secs(5)).expect("spawn");
        assert!(session.close().all_stopped);
        assert!(session.close().all_stopped);
    }

    #[test]
    fn test_spawn_on_claims_port() {
        let registry = TransportRegistry::new();
        let env = Environment::new().with(crate::env::PORT_VAR, "/dev/ttyTEST0");
        let mut session =
            CommandSession::spawn_on(&registry, "cat", &env, Duration::from_secs(5))
                .expect("spawn");
        assert!(registry.is_claimed("/dev/ttyTEST0"));

        let busy = CommandSession::spawn_on(&registry, "cat", &env, Duration::from_secs(5));
        assert!(busy.is_err());

        session.close();
        assert!(!registry.is_claimed("/dev/ttyTEST0"));
    }
}
