//! Harness error taxonomy.
//!
//! `ExpectTimeout` is the expected "test failed" signal and always carries
//! the transcript accumulated before the deadline; everything else is a
//! fault of the harness or the host, not of the device under test.

use dut_harness_terminal::PtyError;
use thiserror::Error;

use crate::tree::ProcessHandle;

#[derive(Error, Debug)]
pub enum HarnessError {
    /// The device child could not be started at all.
    #[error("Failed to spawn device process: {0}")]
    Spawn(String),

    /// A pattern was not observed before the deadline. Recoverable by
    /// design; the partial transcript is essential for diagnosing why the
    /// match failed and is never discarded.
    #[error("Timed out waiting for {pattern}")]
    ExpectTimeout { pattern: String, transcript: String },

    /// One or more processes could not be confirmed stopped after
    /// escalation to a forced kill.
    #[error("{} process(es) still running after supervision", still_running.len())]
    Supervision { still_running: Vec<ProcessHandle> },

    /// PTY transport failure underneath an otherwise healthy session.
    #[error("PTY error during {operation}: {reason}")]
    Pty { operation: String, reason: String },

    /// The configured transport is already claimed by another session.
    #[error("Transport {0} is already claimed by another session")]
    TransportBusy(String),

    /// An external delegate (build/flash) exited nonzero.
    #[error("Delegate command `{command}` failed with exit code {code}")]
    Delegate { command: String, code: i32 },

    #[error("Invalid expect pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub fn is_expect_timeout(&self) -> bool {
        matches!(self, HarnessError::ExpectTimeout { .. })
    }

    /// Transcript text carried by an `ExpectTimeout`, empty otherwise.
    pub fn transcript(&self) -> &str {
        match self {
            HarnessError::ExpectTimeout { transcript, .. } => transcript,
            _ => "",
        }
    }
}

impl From<PtyError> for HarnessError {
    fn from(err: PtyError) -> Self {
        match err {
            PtyError::Spawn(reason) => HarnessError::Spawn(reason),
            PtyError::TransportBusy(transport) => HarnessError::TransportBusy(transport),
            other => HarnessError::Pty {
                operation: other.operation().to_string(),
                reason: other.reason().to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_maps_from_pty_spawn() {
        let err: HarnessError = PtyError::Spawn("no such file".into()).into();
        assert!(matches!(err, HarnessError::Spawn(r) if r == "no such file"));
    }

    #[test]
    fn test_other_pty_errors_keep_operation() {
        let err: HarnessError = PtyError::Read("poll error".into()).into();
        match err {
            HarnessError::Pty { operation, reason } => {
                assert_eq!(operation, "read");
                assert_eq!(reason, "poll error");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_transport_busy_maps_to_its_own_variant() {
        let err: HarnessError = PtyError::TransportBusy("/dev/ttyACM0".into()).into();
        assert!(matches!(err, HarnessError::TransportBusy(t) if t == "/dev/ttyACM0"));
    }

    #[test]
    fn test_expect_timeout_carries_transcript() {
        let err = HarnessError::ExpectTimeout {
            pattern: "\"> \"".into(),
            transcript: "boot banner".into(),
        };
        assert!(err.is_expect_timeout());
        assert_eq!(err.transcript(), "boot banner");
    }

    #[test]
    fn test_supervision_display_counts() {
        let err = HarnessError::Supervision {
            still_running: vec![
                ProcessHandle::new(10, "term"),
                ProcessHandle::new(11, "socat"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "2 process(es) still running after supervision"
        );
    }
}
