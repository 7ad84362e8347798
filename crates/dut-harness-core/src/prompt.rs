//! Startup prompt synchronization.
//!
//! A freshly spawned device may keep printing boot banners after its shell
//! starts answering, so one blind write-then-read can race the boot
//! sequence. Readiness is proven by a fast prompt round-trip, not by the
//! first prompt sighting (which may just be leftover banner output).

use std::time::Duration;

use tracing::debug;

use dut_harness_common::Deadline;

use crate::error::HarnessError;
use crate::protocol::LineChannel;
use crate::session::Expect;

const DEFAULT_PROMPT: &str = "> ";

/// Per-attempt window a responsive device is expected to answer within.
const RETRY_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PromptSync {
    prompt: String,
    retry_window: Duration,
}

impl Default for PromptSync {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            retry_window: RETRY_WINDOW,
        }
    }
}

impl PromptSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt = prompt.to_string();
        self
    }

    #[cfg(test)]
    fn with_retry_window(mut self, window: Duration) -> Self {
        self.retry_window = window;
        self
    }

    /// Probes the channel until the device proves responsive. First wait
    /// (up to the whole budget) for any prompt; then keep nudging with
    /// empty lines, succeeding on the first round-trip that completes
    /// within the short window. Once the budget is too thin for another
    /// full attempt, one final short-window attempt is made and its error
    /// propagates; there is deliberately no retry past that point.
    pub fn wait_ready(
        &self,
        channel: &mut dyn LineChannel,
        timeout: Duration,
    ) -> Result<(), HarnessError> {
        let deadline = Deadline::after(timeout);
        let expect = Expect::literal(&self.prompt);

        channel.send_line("")?;
        channel.read_until(&expect, timeout)?;

        while deadline.has_margin(self.retry_window) {
            channel.send_line("")?;
            match channel.read_until(&expect, self.retry_window) {
                Ok(_) => return Ok(()),
                Err(e) if e.is_expect_timeout() => {
                    debug!("prompt round-trip too slow, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        channel.send_line("")?;
        channel.read_until(&expect, self.retry_window)?;
        Ok(())
    }
}
