#![deny(clippy::all)]

//! Process-tree-aware command sessions for driving embedded devices under
//! test: a spawned child on a PTY, pattern-matched reads with timeouts, a
//! line-oriented command/response protocol, and a teardown discipline that
//! confirms every process the session started is dead before a test run is
//! considered finished.

pub mod env;
pub mod error;
pub mod process;
pub mod prompt;
pub mod protocol;
pub mod runner;
pub mod session;
pub mod sleeper;
pub mod supervisor;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_support;

pub use env::Environment;
pub use error::HarnessError;
pub use prompt::PromptSync;
pub use protocol::CmdResult;
pub use protocol::CommandOutcome;
pub use protocol::CommandProtocol;
pub use protocol::LineChannel;
pub use protocol::PayloadValue;
pub use runner::TestRunner;
pub use session::CommandSession;
pub use session::Expect;
pub use supervisor::ProcessSupervisor;
pub use supervisor::SupervisionReport;
pub use tree::ProcessHandle;
pub use tree::ProcessTreeSnapshot;

pub type Result<T> = std::result::Result<T, HarnessError>;
