use std::io::Read;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::debug;
use tracing::info;
use tracing::warn;

use dut_harness_core::CommandProtocol;
use dut_harness_core::CommandSession;
use dut_harness_core::Environment;
use dut_harness_core::HarnessError;
use dut_harness_core::PromptSync;
use dut_harness_core::TestRunner;
use dut_harness_core::protocol::CmdResult;

const TERM_POLL_MS: i32 = 100;

/// Environment handed to every spawned command: the host environment
/// with the CLI's board/port selections layered on top.
pub fn build_env(board: Option<&str>, port: Option<&str>) -> Environment {
    let mut env = Environment::from_host();
    if let Some(board) = board {
        env.set(dut_harness_core::env::BOARD_VAR, board);
    }
    if let Some(port) = port {
        env.set(dut_harness_core::env::PORT_VAR, port);
    }
    env
}

#[allow(clippy::too_many_arguments)]
pub fn handle_exec(
    env: Environment,
    timeout: Duration,
    spawn: &str,
    commands: &[String],
    flash: Option<&str>,
    reset: Option<&str>,
    sync: bool,
    echo: bool,
) -> Result<i32, HarnessError> {
    let interrupted = sigint_flag()?;
    let timeout = env.timeout_override().unwrap_or(timeout);

    let mut runner = TestRunner::new(env, timeout).with_echo(echo);
    if let Some(flash) = flash {
        runner = runner.with_flash(flash);
    }
    if let Some(reset) = reset {
        runner = runner.with_reset(reset);
    }

    let mut failed = 0usize;
    let code = runner.run(spawn, |session| {
        if sync {
            PromptSync::new().wait_ready(&mut *session, timeout)?;
        }

        for command in commands {
            if interrupted.load(Ordering::Relaxed) {
                warn!("interrupted, tearing down");
                break;
            }

            let outcome = CommandProtocol::new(&mut *session, timeout).run(command)?;
            if outcome.result != CmdResult::Success {
                failed += 1;
            }
            println!("{}", render_json(&outcome));
        }
        Ok(())
    })?;

    if code == 0 && failed > 0 {
        info!(failed, total = commands.len(), "commands did not succeed");
        return Ok(1);
    }
    Ok(code)
}

pub fn handle_probe(
    env: Environment,
    timeout: Duration,
    spawn: &str,
    prompt: &str,
) -> Result<i32, HarnessError> {
    let timeout = env.timeout_override().unwrap_or(timeout);
    let mut session = CommandSession::spawn(spawn, &env, timeout)?;
    session.set_echo(Box::new(std::io::stderr()));

    let result = PromptSync::new()
        .with_prompt(prompt)
        .wait_ready(&mut session, timeout);
    let pid = session.pid();
    let processes = session.snapshot().len();
    session.close();

    result?;
    println!(
        "{}",
        serde_json::json!({
            "ready": true,
            "pid": pid,
            "processes": processes,
        })
    );
    Ok(0)
}

/// Interactive attach. Two forwarding threads shuttle bytes between the
/// local terminal and the device PTY; they are abandoned at detach (both
/// block on reads with no clean cancellation point) and die with the
/// process. Teardown of the device tree happens on the main thread.
pub fn handle_term(
    env: Environment,
    timeout: Duration,
    spawn: &str,
) -> Result<i32, HarnessError> {
    let interrupted = sigint_flag()?;

    let mut session = CommandSession::spawn(spawn, &env, timeout)?;
    let pty = session.raw_channel();
    info!(pid = ?session.pid(), "attached, press Ctrl-C to detach");

    let writer = Arc::clone(&pty);
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if writer.write(&buf[..n]).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let reader = Arc::clone(&pty);
    std::thread::spawn(move || {
        let mut stdout = std::io::stdout();
        let mut buf = [0u8; 4096];
        loop {
            match reader.try_read(&mut buf, TERM_POLL_MS) {
                Ok(0) => {}
                Ok(n) => {
                    if stdout.write_all(&buf[..n]).is_err() || stdout.flush().is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    while session.is_running() && !interrupted.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(TERM_POLL_MS as u64));
    }

    debug!("detaching");
    let report = session.close();
    if !report.all_stopped {
        return Err(HarnessError::Supervision {
            still_running: report.still_running,
        });
    }
    Ok(0)
}

fn sigint_flag() -> Result<Arc<AtomicBool>, HarnessError> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))?;
    Ok(flag)
}

fn render_json(outcome: &dut_harness_core::CommandOutcome) -> String {
    // Outcome fields are strings and integers; serialization cannot fail.
    serde_json::to_string(outcome).unwrap_or_else(|_| "{}".to_string())
}
