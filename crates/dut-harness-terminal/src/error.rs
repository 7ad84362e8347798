//! PTY operation errors.

use thiserror::Error;

/// Errors raised by PTY spawning and raw I/O.
#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open PTY: {0}")]
    Open(String),
    #[error("Failed to spawn process: {0}")]
    Spawn(String),
    #[error("Failed to write to PTY: {0}")]
    Write(String),
    #[error("Failed to read from PTY: {0}")]
    Read(String),
    #[error("Failed to signal process group: {0}")]
    Signal(String),
    #[error("Transport {0} is already claimed by another session")]
    TransportBusy(String),
}

impl PtyError {
    /// Returns the operation that failed.
    pub fn operation(&self) -> &'static str {
        match self {
            PtyError::Open(_) => "open",
            PtyError::Spawn(_) => "spawn",
            PtyError::Write(_) => "write",
            PtyError::Read(_) => "read",
            PtyError::Signal(_) => "signal",
            PtyError::TransportBusy(_) => "claim",
        }
    }

    /// Returns the underlying reason/message for the error.
    pub fn reason(&self) -> &str {
        match self {
            PtyError::Open(r)
            | PtyError::Spawn(r)
            | PtyError::Write(r)
            | PtyError::Read(r)
            | PtyError::Signal(r)
            | PtyError::TransportBusy(r) => r,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        assert_eq!(PtyError::Open("x".into()).operation(), "open");
        assert_eq!(PtyError::Spawn("x".into()).operation(), "spawn");
        assert_eq!(PtyError::Write("x".into()).operation(), "write");
        assert_eq!(PtyError::Read("x".into()).operation(), "read");
        assert_eq!(PtyError::Signal("x".into()).operation(), "signal");
    }

    #[test]
    fn test_reason() {
        let err = PtyError::Spawn("command not found".into());
        assert_eq!(err.reason(), "command not found");
    }

    #[test]
    fn test_transport_busy_display() {
        let err = PtyError::TransportBusy("/dev/ttyACM0".into());
        assert_eq!(
            err.to_string(),
            "Transport /dev/ttyACM0 is already claimed by another session"
        );
    }
}
