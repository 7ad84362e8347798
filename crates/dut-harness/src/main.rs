#![deny(clippy::all)]

mod commands;
mod handlers;

use std::io::IsTerminal;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dut_harness_core::HarnessError;

use crate::commands::Cli;
use crate::commands::Commands;

fn main() {
    init_logging();

    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout);
    let env = handlers::build_env(cli.board.as_deref(), cli.port.as_deref());

    let result = match cli.command {
        Commands::Exec {
            spawn,
            commands,
            flash,
            reset,
            sync,
            echo,
        } => handlers::handle_exec(
            env,
            timeout,
            &spawn,
            &commands,
            flash.as_deref(),
            reset.as_deref(),
            sync,
            echo,
        ),
        Commands::Probe { spawn, prompt } => handlers::handle_probe(env, timeout, &spawn, &prompt),
        Commands::Term { spawn } => handlers::handle_term(env, timeout, &spawn),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if let HarnessError::ExpectTimeout { transcript, .. } = &e {
                if !transcript.is_empty() {
                    eprintln!("Unmatched output:\n{transcript}");
                }
            }
            eprintln!("Error: {e}");
            std::process::exit(exit_code_for(&e));
        }
    }
}

fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init();
}

fn exit_code_for(error: &HarnessError) -> i32 {
    match error {
        HarnessError::Spawn(_) => 69,             // EX_UNAVAILABLE
        HarnessError::ExpectTimeout { .. } => 75, // EX_TEMPFAIL
        HarnessError::Supervision { .. } => 70,   // EX_SOFTWARE
        HarnessError::Pty { .. } => 74,           // EX_IOERR
        HarnessError::TransportBusy(_) => 73,     // EX_CANTCREAT
        HarnessError::Delegate { code, .. } => *code,
        HarnessError::Pattern(_) => 64, // EX_USAGE
        HarnessError::Io(_) => 74,      // EX_IOERR
    }
}
