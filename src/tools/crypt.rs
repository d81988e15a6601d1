//! LUKS encryption (cryptsetup)
//!
//! Each Bryck drive is opened as `/dev/mapper/crypt<kernel name>`; the
//! partitions and RAID members then live on the mapped device.

use std::path::Path;

use tracing::debug;

use super::{basename, Shell};
use crate::domain::ports::CommandOutput;
use crate::error::Result;

/// cryptsetup stderr fragments that mean the key itself was rejected.
const BAD_CREDENTIAL_MARKERS: &[&str] = &[
    "No key available with this passphrase",
    "Failed to open key file",
];

/// Classified result of opening one drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// Mapping created
    Unlocked,
    /// The key file was unreadable or does not match any key slot
    BadCredential(String),
    /// Any other failure, typically a damaged header
    Failed(String),
}

impl UnlockOutcome {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, UnlockOutcome::Unlocked)
    }

    fn classify(output: &CommandOutput) -> Self {
        if output.success() {
            return UnlockOutcome::Unlocked;
        }
        let stderr = output.stderr.clone();
        if BAD_CREDENTIAL_MARKERS.iter().any(|m| stderr.contains(m)) {
            UnlockOutcome::BadCredential(stderr)
        } else {
            UnlockOutcome::Failed(stderr)
        }
    }
}

/// Drives cryptsetup for setup, open/close, key change and header backup.
#[derive(Debug, Clone)]
pub struct CryptManager {
    shell: Shell,
}

impl CryptManager {
    pub fn new(shell: Shell) -> Self {
        Self { shell }
    }

    /// Device-mapper name for a drive (`/dev/nvme0n1` -> `cryptnvme0n1`).
    pub fn mapped_name(drive: &str) -> String {
        format!("crypt{}", basename(drive))
    }

    /// Full mapped device path (`/dev/mapper/cryptnvme0n1`).
    pub fn mapped_path(drive: &str) -> String {
        format!("/dev/mapper/{}", Self::mapped_name(drive))
    }

    pub async fn setup(&self, drive: &str, key_file: &Path) -> CommandOutput {
        debug!("Setting up encryption on {}", drive);
        self.shell
            .run(&format!("cryptsetup -q luksFormat {drive} {}", key_file.display()))
            .await
    }

    /// Open the drive; on success the kernel is asked to re-read partitions.
    pub async fn unlock_raw(&self, drive: &str, key_file: &Path) -> CommandOutput {
        let mapped = Self::mapped_name(drive);
        debug!("Unlocking {} as {}", drive, mapped);
        let out = self
            .shell
            .run(&format!(
                "cryptsetup open --key-file {} {drive} {mapped}",
                key_file.display()
            ))
            .await;
        if out.success() {
            self.shell.attempt("partprobe").await;
        }
        out
    }

    pub async fn unlock(&self, drive: &str, key_file: &Path) -> UnlockOutcome {
        UnlockOutcome::classify(&self.unlock_raw(drive, key_file).await)
    }

    /// Remove partition mappings on the opened drive, then close it.
    pub async fn lock(&self, drive: &str) -> CommandOutput {
        let mapped = Self::mapped_name(drive);

        let mut parts = self.shell.run(&format!("ls /dev/mapper/{mapped}p*")).await;
        if !parts.success() {
            parts = self.shell.run(&format!("ls /dev/mapper/{mapped}[1-2]")).await;
        }
        for part in parts.stdout.split_whitespace() {
            let out = self.shell.run(&format!("dmsetup remove {part}")).await;
            if !out.success() {
                return out;
            }
        }

        debug!("Locking {}", mapped);
        self.shell.run(&format!("cryptsetup close {mapped}")).await
    }

    /// Undo any mapping for the drive, whatever state it is in.
    pub async fn reset(&self, drive: &str) -> CommandOutput {
        debug!("Resetting encryption on {}", drive);
        let out = self.lock(drive).await;
        if !out.success() {
            debug!(drive = %drive, stderr = %out.stderr.trim(), "Lock before reset failed");
        }
        self.shell
            .run(&format!("cryptsetup remove {}", Self::mapped_name(drive)))
            .await
    }

    pub async fn change_key(&self, drive: &str, old_key: &Path, new_key: &Path) -> CommandOutput {
        debug!("Changing key on {}", drive);
        self.shell
            .run(&format!(
                "cryptsetup luksChangeKey {drive} --key-file {} {}",
                old_key.display(),
                new_key.display()
            ))
            .await
    }

    /// True when `blkid` reports a LUKS container on the drive.
    pub async fn is_luks(&self, drive: &str) -> bool {
        let out = self.shell.run(&format!("blkid {drive}")).await;
        out.success() && out.stdout.contains("crypto_LUKS")
    }

    /// True when at least one of the drives carries LUKS.
    pub async fn is_enabled(&self, drives: &[String]) -> bool {
        for drive in drives {
            if self.is_luks(drive).await {
                return true;
            }
        }
        false
    }

    /// Save the drive's LUKS header to `file`, replacing any older copy.
    pub async fn backup_header(&self, drive: &str, file: &Path) -> Result<()> {
        if file.exists() {
            tokio::fs::remove_file(file).await?;
        }
        self.shell
            .check(&format!(
                "cryptsetup luksHeaderBackup {drive} --header-backup-file {}",
                file.display()
            ))
            .await?;
        Ok(())
    }

    /// Check that `file` is a readable header backup, then write it back.
    pub async fn restore_header(&self, drive: &str, file: &Path) -> Result<()> {
        self.shell
            .check(&format!("cryptsetup luksDump {}", file.display()))
            .await?;
        self.shell
            .check(&format!(
                "cryptsetup -q luksHeaderRestore {drive} --header-backup-file {}",
                file.display()
            ))
            .await?;
        Ok(())
    }
}
