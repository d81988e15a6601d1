//! Secure erase

use tracing::debug;

use super::Shell;
use crate::domain::ports::CommandOutput;
use crate::hardware::DriveType;

#[derive(Debug, Clone)]
pub struct EraseManager {
    shell: Shell,
    drive_type: DriveType,
}

impl EraseManager {
    pub fn new(shell: Shell, drive_type: DriveType) -> Self {
        Self { shell, drive_type }
    }

    /// Crypto-erase an NVMe namespace or discard every block of a SATA drive.
    pub async fn erase(&self, drive: &str) -> CommandOutput {
        debug!("Securely erasing {}", drive);
        let command = match self.drive_type {
            DriveType::Nvme => format!("nvme format --force --ses=1 {drive}"),
            DriveType::Sata => format!("blkdiscard {drive}"),
        };
        self.shell.run(&command).await
    }
}
