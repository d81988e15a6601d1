//! External Tool Wrappers
//!
//! Thin command builders for the host maintenance tools a Bryck relies on.
//! Each manager owns a [`Shell`] and turns one lifecycle action into one or
//! more command lines; none of them keeps state between calls.
//!
//! | Manager | Tools |
//! |---|---|
//! | [`RaidManager`] | mdadm |
//! | [`CryptManager`] | cryptsetup, dmsetup, blkid, partprobe |
//! | [`PartitionManager`] | parted, sfdisk |
//! | [`FilesystemManager`] | mkfs.xfs, mount, umount, df, sync/sysctl |
//! | [`EraseManager`] | nvme format, blkdiscard |

pub mod crypt;
pub mod erase;
pub mod filesystem;
pub mod partition;
pub mod raid;

pub use crypt::{CryptManager, UnlockOutcome};
pub use erase::EraseManager;
pub use filesystem::{FilesystemManager, FilesystemUsage};
pub use partition::PartitionManager;
pub use raid::RaidManager;

use std::sync::Arc;

use tracing::debug;

use crate::domain::ports::{CommandOutput, CommandRunner};
use crate::error::Result;

/// Logged access to the command runner.
#[derive(Clone)]
pub struct Shell {
    runner: Arc<dyn CommandRunner>,
}

impl Shell {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Run a command line and return its raw output.
    pub async fn run(&self, command: &str) -> CommandOutput {
        debug!(command = %command, "Running");
        let output = self.runner.execute(command).await;
        if !output.success() {
            debug!(
                command = %command,
                exit_code = output.exit_code,
                stderr = %output.stderr.trim(),
                "Command failed"
            );
        }
        output
    }

    /// Run a command line, turning a non-zero exit into `CommandFailed`.
    pub async fn check(&self, command: &str) -> Result<CommandOutput> {
        self.run(command).await.check(command)
    }

    /// Run a command whose outcome does not matter.
    pub async fn attempt(&self, command: &str) {
        self.run(command).await;
    }
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell").finish_non_exhaustive()
    }
}

/// Last path component of a device path (`/dev/nvme0n1` -> `nvme0n1`).
pub fn basename(device: &str) -> &str {
    device.rsplit('/').next().unwrap_or(device)
}
