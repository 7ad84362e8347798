use clap::Parser;
use clap::Subcommand;

const LONG_ABOUT: &str = r#"dut-harness drives an embedded device under test through a serial-style
terminal command, supervises every process that command starts, and
guarantees teardown even when a test run fails.

WORKFLOW:
    1. Point the harness at a terminal command (e.g. `make term`)
    2. Optionally flash the device first with --flash
    3. Drive the device through protocol commands, or attach interactively
    4. The harness confirms every spawned process is dead before exiting

EXAMPLES:
    # Run a sequence of protocol commands, printing one JSON outcome each
    dut-harness exec "make term" ping version

    # Flash first, sync on the shell prompt, then run
    dut-harness exec --flash "make flash" --sync "make term" ping

    # Check that the device answers its prompt at all
    dut-harness probe "make term"

    # Attach an interactive terminal (Ctrl-C detaches and tears down)
    dut-harness term "picocom /dev/ttyACM0""#;

#[derive(Parser)]
#[command(name = "dut-harness")]
#[command(author, version)]
#[command(about = "Process-tree-aware command sessions for devices under test")]
#[command(long_about = LONG_ABOUT)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Read budget in seconds for each expect (DUT_TIMEOUT overrides)
    #[arg(short, long, global = true, default_value = "10")]
    pub timeout: u64,

    /// Target board name, exported to the spawned terminal command
    #[arg(short, long, global = true, env = "BOARD")]
    pub board: Option<String>,

    /// Serial port / transport, exported and claimed for exclusive use
    #[arg(short, long, global = true, env = "PORT")]
    pub port: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Drive the device through a list of protocol commands
    #[command(long_about = r#"Drive the device through a list of protocol commands.

Spawns the terminal command on a PTY, sends each protocol command as a
line, and classifies the response block by its Success:/Error: marker.
One JSON outcome is printed per command. The exit code is nonzero if
any command did not succeed.

EXAMPLES:
    dut-harness exec "make term" ping version
    dut-harness exec --echo --timeout 30 "make term" bench
    BOARD=samr21-xpro dut-harness exec --flash "make flash" "make term" ping"#)]
    Exec {
        /// Terminal command that talks to the device
        spawn: String,

        /// Protocol commands to send, in order
        #[arg(trailing_var_arg = true, required = true)]
        commands: Vec<String>,

        /// Build/flash command to run to completion before spawning
        #[arg(long)]
        flash: Option<String>,

        /// Reset command to fire after spawning (failure is tolerated)
        #[arg(long)]
        reset: Option<String>,

        /// Synchronize on the device prompt before the first command
        #[arg(long)]
        sync: bool,

        /// Mirror all raw PTY traffic to stderr
        #[arg(short, long)]
        echo: bool,
    },

    /// Spawn the terminal command and check the device answers its prompt
    Probe {
        /// Terminal command that talks to the device
        spawn: String,

        /// Prompt string to synchronize on
        #[arg(long, default_value = "> ")]
        prompt: String,
    },

    /// Attach an interactive terminal to the device
    #[command(long_about = r#"Attach an interactive terminal to the device.

Stdin is forwarded to the device and device output to stdout until the
device exits or Ctrl-C is pressed. Either way the whole process tree
behind the terminal command is torn down before exiting."#)]
    Term {
        /// Terminal command that talks to the device
        spawn: String,
    },
}
