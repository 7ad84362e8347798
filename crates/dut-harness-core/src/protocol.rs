//! Command/response framing over a line channel.
//!
//! Device firmware answers each command with a block of lines terminated by
//! a blank line. Recognized line prefixes, verbatim from the wire format:
//! a command echo, a success marker, and an error marker. Success payloads
//! may carry a trailing bracketed list (`[v1, v2, ...]`, comma-space
//! separated) mixing integers and text.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use dut_harness_common::Deadline;

use crate::error::HarnessError;
use crate::session::CommandSession;
use crate::session::Expect;

pub const COMMAND_PREFIX: &str = "Command: ";
pub const SUCCESS_PREFIX: &str = "Success: ";
pub const ERROR_PREFIX: &str = "Error: ";

/// Duplex line channel a protocol conversation runs over. Implemented by
/// `CommandSession`; test code scripts its own.
pub trait LineChannel {
    fn send_line(&mut self, text: &str) -> Result<(), HarnessError>;

    fn read_line(&mut self, timeout: Duration) -> Result<String, HarnessError>;

    fn read_until(&mut self, expect: &Expect, timeout: Duration) -> Result<String, HarnessError>;
}

impl LineChannel for CommandSession {
    fn send_line(&mut self, text: &str) -> Result<(), HarnessError> {
        CommandSession::send_line(self, text)
    }

    fn read_line(&mut self, timeout: Duration) -> Result<String, HarnessError> {
        CommandSession::read_line(self, timeout)
    }

    fn read_until(&mut self, expect: &Expect, timeout: Duration) -> Result<String, HarnessError> {
        CommandSession::read_until(self, expect, timeout)
    }
}

/// Classification of one command exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CmdResult {
    Success,
    Error,
    Timeout,
}

/// One element of a bracketed response payload. Firmware freely mixes
/// numeric and textual fields in a single list; that heterogeneity is
/// preserved exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Int(i64),
    Text(String),
}

/// Immutable record of one command exchange. `result` is always populated;
/// `data` is either a well-formed list or absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub command: String,
    pub message: String,
    pub data: Option<Vec<PayloadValue>>,
    pub result: CmdResult,
}

/// Framing and classification on top of one line channel.
pub struct CommandProtocol<'a> {
    channel: &'a mut dyn LineChannel,
    timeout: Duration,
}

impl<'a> CommandProtocol<'a> {
    pub fn new(channel: &'a mut dyn LineChannel, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    /// Sends `command` and reads the response block. The first recognized
    /// terminal marker line decides the classification and is never
    /// reinterpreted; if the read deadline passes before any terminal
    /// marker, the outcome is `Timeout` with exactly the text observed so
    /// far. Transport failures (not timeouts) propagate as errors.
    pub fn run(&mut self, command: &str) -> Result<CommandOutcome, HarnessError> {
        self.channel.send_line(command)?;

        let deadline = Deadline::after(self.timeout);
        let mut observed: Vec<String> = Vec::new();
        let mut terminal: Option<(CmdResult, String)> = None;

        let (result, payload) = loop {
            match self.channel.read_line(deadline.remaining()) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        if let Some(classified) = terminal.take() {
                            break classified;
                        }
                        continue;
                    }
                    observed.push(line.clone());
                    if terminal.is_none() {
                        if let Some(rest) = line.strip_prefix(SUCCESS_PREFIX) {
                            terminal = Some((CmdResult::Success, rest.to_string()));
                        } else if let Some(rest) = line.strip_prefix(ERROR_PREFIX) {
                            terminal = Some((CmdResult::Error, rest.to_string()));
                        } else if let Some(echo) = line.strip_prefix(COMMAND_PREFIX) {
                            if echo != command {
                                debug!(sent = command, echoed = echo, "command echo mismatch");
                            }
                        }
                    }
                }
                Err(e) if e.is_expect_timeout() => {
                    // A classification already reached stands even when the
                    // closing blank line never arrives.
                    if let Some(classified) = terminal.take() {
                        break classified;
                    }
                    let mut message = observed.join("\n");
                    let leftover = e.transcript();
                    if !leftover.is_empty() {
                        if !message.is_empty() {
                            message.push('\n');
                        }
                        message.push_str(leftover);
                    }
                    return Ok(CommandOutcome {
                        command: command.to_string(),
                        message,
                        data: None,
                        result: CmdResult::Timeout,
                    });
                }
                Err(e) => return Err(e),
            }
        };

        let (message, data) = match result {
            CmdResult::Success => split_payload(&payload),
            _ => (payload, None),
        };

        Ok(CommandOutcome {
            command: command.to_string(),
            message,
            data,
            result,
        })
    }
}

/// Splits a trailing bracketed list off a success payload. Without a
/// well-formed trailing `[...]` the whole payload is the message and data
/// is absent.
fn split_payload(payload: &str) -> (String, Option<Vec<PayloadValue>>) {
    let Some(body) = payload.strip_suffix(']') else {
        return (payload.to_string(), None);
    };
    let Some(open) = body.rfind('[') else {
        return (payload.to_string(), None);
    };

    let message = body[..open].trim_end().to_string();
    let inner = &body[open + 1..];
    let data = if inner.is_empty() {
        Vec::new()
    } else {
        inner.split(", ").map(parse_value).collect()
    };
    (message, Some(data))
}

/// Integers lex as decimal or `0x` hex; anything else stays text.
fn parse_value(token: &str) -> PayloadValue {
    if let Some(hex) = token.strip_prefix("0x") {
        if let Ok(value) = i64::from_str_radix(hex, 16) {
            return PayloadValue::Int(value);
        }
    }
    if let Ok(value) = token.parse::<i64>() {
        return PayloadValue::Int(value);
    }
    PayloadValue::Text(token.to_string())
}
