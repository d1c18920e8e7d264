//! CommandExecutor port - the transport capability providers consume.
//!
//! Providers never talk to a host directly; they issue commands and file
//! writes through this capability, which a local or remote transport
//! implements.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::EngineResult;

/// Captured output of a remote command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stdout, the common case when parsing probe output.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Options for a command run: identity, working directory, deadline.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub user: Option<String>,
    pub cwd: Option<String>,
    pub timeout: Option<Duration>,
}

/// Abstract command transport to a target host.
///
/// A non-zero exit code is not an `Err`; it is a normal `CommandOutput`.
/// `Err` is reserved for transport failures (connection loss, spawn
/// failure, timeout).
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Human-readable target identity, for logging.
    fn target(&self) -> &str;

    /// Run a shell command with default options.
    async fn run(&self, command: &str) -> EngineResult<CommandOutput> {
        self.run_with(command, RunOptions::default()).await
    }

    /// Run a shell command with explicit options.
    async fn run_with(&self, command: &str, options: RunOptions) -> EngineResult<CommandOutput>;

    /// Write a file on the target. Implementations create parent
    /// directories as needed.
    async fn write_file(&self, path: &str, content: &[u8]) -> EngineResult<()>;

    /// Read a file from the target, or `None` when it does not exist.
    async fn read_file(&self, path: &str) -> EngineResult<Option<Vec<u8>>>;
}
