//! Local command transport.
//!
//! Runs commands on the engine host via `sh -c`, implementing the
//! [`CommandExecutor`] capability so plan/apply work without a remote
//! transport. Remote transports (SSH and friends) implement the same port
//! elsewhere.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ports::{CommandExecutor, CommandOutput, RunOptions};

pub struct LocalExecutor {
    target: String,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self {
            target: "localhost".to_string(),
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    fn target(&self) -> &str {
        &self.target
    }

    async fn run_with(&self, command: &str, options: RunOptions) -> EngineResult<CommandOutput> {
        debug!(command, "running local command");

        let shell_command = match &options.user {
            Some(user) => format!("sudo -u {user} sh -c {}", shell_escape(command)),
            None => command.to_string(),
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&shell_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        let child = cmd
            .spawn()
            .map_err(|e| EngineError::Executor(format!("failed to spawn command: {e}")))?;

        let output = match options.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| EngineError::Timeout(limit))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| EngineError::Executor(format!("failed to collect command output: {e}")))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> EngineResult<()> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(content).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> EngineResult<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::Io(e)),
        }
    }
}

fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
