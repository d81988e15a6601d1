//! XFS filesystems, mounts and usage

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::Shell;
use crate::error::{Error, Result};

/// `df` figures for a mounted filesystem, in GB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesystemUsage {
    pub usable_capacity: f64,
    pub used_space: f64,
    pub available_space: f64,
    /// Use% column as printed by df (e.g. `"3%"`)
    pub usage: String,
}

fn kb_to_gb(kb: &str) -> Option<f64> {
    let kb: f64 = kb.parse().ok()?;
    Some((kb / (1024.0 * 1024.0) * 100.0).round() / 100.0)
}

impl FilesystemUsage {
    /// Parse the data line of `df` output (header line skipped).
    pub fn parse_df(output: &str) -> Option<Self> {
        let line = output
            .lines()
            .find(|l| !l.trim().is_empty() && !l.starts_with("Filesystem"))?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            return None;
        }
        Some(Self {
            usable_capacity: kb_to_gb(fields[1])?,
            used_space: kb_to_gb(fields[2])?,
            available_space: kb_to_gb(fields[3])?,
            usage: fields[4].to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FilesystemManager {
    shell: Shell,
}

impl FilesystemManager {
    pub fn new(shell: Shell) -> Self {
        Self { shell }
    }

    /// Poll until the device node exists.
    pub async fn wait_for_device(
        &self,
        device: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shell.run(&format!("test -e {device}")).await.success() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::NotFound(format!("device {device} did not appear")));
            }
            sleep(interval).await;
        }
    }

    /// Make an XFS filesystem on `device` once it shows up.
    pub async fn create(&self, device: &str, timeout: Duration, interval: Duration) -> Result<()> {
        debug!("Creating filesystem on {}", device);
        self.wait_for_device(device, timeout, interval).await?;
        self.shell.check(&format!("mkfs.xfs -f -K {device}")).await?;
        Ok(())
    }

    /// Mount `device` at `path`, creating the directory if needed.
    pub async fn mount(&self, device: &str, path: &Path) -> Result<()> {
        let path = path.display();
        debug!("Mounting {} at {}", device, path);
        self.shell.check(&format!("mkdir -p {path}")).await?;
        self.shell.check(&format!("mount {device} {path}")).await?;
        self.shell.check(&format!("chmod 777 {path}")).await?;
        Ok(())
    }

    /// Unmount a mount point or device.
    pub async fn unmount(&self, target: &str) -> Result<()> {
        debug!("Unmounting {}", target);
        self.shell.check(&format!("umount {target}")).await?;
        Ok(())
    }

    /// Write back dirty pages and drop the page cache.
    pub async fn flush(&self) -> Result<()> {
        debug!("Flushing filesystem caches");
        self.shell.check("sync").await?;
        self.shell.check("sysctl -w vm.drop_caches=3").await?;
        Ok(())
    }

    /// True when `device` is the source of an entry in /proc/mounts.
    pub async fn is_mounted(&self, device: &str) -> bool {
        let out = self.shell.run("cat /proc/mounts").await;
        out.success()
            && out
                .stdout
                .lines()
                .any(|line| line.split_whitespace().next() == Some(device))
    }

    pub async fn usage(&self, target: &str) -> Option<FilesystemUsage> {
        let out = self.shell.run(&format!("df {target}")).await;
        if !out.success() {
            return None;
        }
        FilesystemUsage::parse_df(&out.stdout)
    }
}
