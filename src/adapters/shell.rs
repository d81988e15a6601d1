//! Shell command runner
//!
//! Implements the `CommandRunner` port by handing each command line to
//! `sh -c`, optionally through `sudo`.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;

use crate::domain::ports::{CommandOutput, CommandRunner};

/// Exit status reported when the shell itself could not be started.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

#[derive(Debug, Clone, Default)]
pub struct ShellCommandRunner {
    use_sudo: bool,
}

impl ShellCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every command as `sudo sh -c ...`.
    pub fn with_sudo() -> Self {
        Self { use_sudo: true }
    }

    fn command(&self, line: &str) -> Command {
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("sh");
            cmd
        } else {
            Command::new("sh")
        };
        cmd.arg("-c").arg(line).kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn execute(&self, command: &str) -> CommandOutput {
        match self.command(command).output().await {
            Ok(output) => CommandOutput {
                // Killed by a signal: no exit code.
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Err(e) => {
                warn!(command = %command, error = %e, "Failed to spawn shell");
                CommandOutput::new(SPAWN_FAILURE_EXIT_CODE, "", e.to_string())
            }
        }
    }
}
