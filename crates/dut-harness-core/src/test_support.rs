//! Scripted channel for driving the protocol and prompt layers without a
//! real child process.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::HarnessError;
use crate::protocol::LineChannel;
use crate::session::Expect;

/// A line channel whose device side is a script: each `send_line` releases
/// the next queued response into the readable buffer. Reads that exhaust
/// the buffer fail with `ExpectTimeout` immediately (no real waiting).
#[derive(Default)]
pub struct ScriptedChannel {
    buffer: String,
    responses: VecDeque<String>,
    sent: Vec<String>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&mut self, text: &str) {
        self.responses.push_back(text.to_string());
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.clone()
    }
}

impl LineChannel for ScriptedChannel {
    fn send_line(&mut self, text: &str) -> Result<(), HarnessError> {
        self.sent.push(text.to_string());
        if let Some(response) = self.responses.pop_front() {
            self.buffer.push_str(&response);
        }
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<String, HarnessError> {
        let consumed = self.read_until(&Expect::literal("\n"), timeout)?;
        let line = consumed.strip_suffix('\n').unwrap_or(&consumed);
        let line = line.strip_suffix('\r').unwrap_or(line);
        Ok(line.to_string())
    }

    fn read_until(&mut self, expect: &Expect, _timeout: Duration) -> Result<String, HarnessError> {
        let end = match expect {
            Expect::Literal(text) => self.buffer.find(text.as_str()).map(|at| at + text.len()),
            Expect::Pattern(regex) => regex.find(&self.buffer).map(|m| m.end()),
        };
        match end {
            Some(end) => Ok(self.buffer.drain(..end).collect()),
            None => Err(HarnessError::ExpectTimeout {
                pattern: format!("{expect:?}"),
                transcript: self.buffer.clone(),
            }),
        }
    }
}
