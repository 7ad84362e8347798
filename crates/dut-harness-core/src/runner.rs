//! Outermost test driver: build/flash, spawn, best-effort reset, run the
//! caller's test procedure, and guarantee session teardown on every exit
//! path.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::error;
use tracing::info;

use dut_harness_terminal::TransportRegistry;

use crate::env::Environment;
use crate::error::HarnessError;
use crate::session::CommandSession;
use crate::sleeper::RealSleeper;
use crate::sleeper::Sleeper;

/// Delay after spawn, letting the remote program finish its own startup
/// housekeeping before the first traffic.
const STARTUP_GRACE: Duration = Duration::from_secs(3);

pub struct TestRunner {
    env: Environment,
    timeout: Duration,
    echo: bool,
    flash_command: Option<String>,
    reset_command: Option<String>,
    grace: Duration,
    sleeper: Arc<dyn Sleeper>,
    registry: TransportRegistry,
}

impl TestRunner {
    pub fn new(env: Environment, timeout: Duration) -> Self {
        // An operator-set override beats the caller's default.
        let timeout = env.timeout_override().unwrap_or(timeout);
        Self {
            env,
            timeout,
            echo: false,
            flash_command: None,
            reset_command: None,
            grace: STARTUP_GRACE,
            sleeper: Arc::new(RealSleeper),
            registry: TransportRegistry::new(),
        }
    }

    /// Mirror session traffic to stderr.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// External build-and-program delegate; nonzero exit aborts the run.
    pub fn with_flash(mut self, command: &str) -> Self {
        self.flash_command = Some(command.to_string());
        self
    }

    /// External reset delegate; its failure is tolerated (some devices
    /// reset by rebooting, which makes the trigger program exit nonzero).
    pub fn with_reset(mut self, command: &str) -> Self {
        self.reset_command = Some(command.to_string());
        self
    }

    pub fn with_registry(mut self, registry: TransportRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[cfg(test)]
    fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Runs `test_fn` against a fresh session spawned from `spawn_command`.
    ///
    /// Teardown is guaranteed: it runs before the test result is
    /// interpreted, and the session's `Drop` covers a panicking test
    /// procedure. An `ExpectTimeout` from the test is reported and turned
    /// into exit code 1; any other error propagates unchanged after
    /// teardown.
    pub fn run<F>(&self, spawn_command: &str, test_fn: F) -> Result<i32, HarnessError>
    where
        F: FnOnce(&mut CommandSession) -> Result<(), HarnessError>,
    {
        if let Some(command) = &self.flash_command {
            self.run_delegate(command)?;
        }

        let mut session =
            CommandSession::spawn_on(&self.registry, spawn_command, &self.env, self.timeout)?;
        if self.echo {
            session.set_echo(Box::new(std::io::stderr()));
        }

        self.sleeper.sleep(self.grace);

        if let Some(command) = &self.reset_command {
            if let Err(e) = self.run_delegate(command) {
                debug!(error = %e, "reset delegate failed, continuing");
            }
        }

        let result = test_fn(&mut session);
        session.close();

        match result {
            Ok(()) => {
                info!("test passed");
                Ok(0)
            }
            Err(HarnessError::ExpectTimeout {
                pattern,
                transcript,
            }) => {
                error!(%pattern, "test failed: timeout waiting for expected output");
                if !transcript.is_empty() {
                    error!("unmatched output:\n{transcript}");
                }
                Ok(1)
            }
            Err(other) => Err(other),
        }
    }

    /// Opaque external command: the exit code is the whole contract.
    fn run_delegate(&self, command: &str) -> Result<(), HarnessError> {
        debug!(command, "running delegate");
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .envs(self.env.as_pairs())
            .status()?;

        if status.success() {
            Ok(())
        } else {
            Err(HarnessError::Delegate {
                command: command.to_string(),
                code: status.code().unwrap_or(-1),
            })
        }
    }
}
