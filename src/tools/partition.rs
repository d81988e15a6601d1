//! Partition tables (parted, sfdisk)

use std::path::Path;

use tracing::debug;

use super::Shell;
use crate::domain::ports::CommandOutput;
use crate::error::{Error, Result};

/// Creates, wipes, dumps and re-applies GPT partition tables.
#[derive(Debug, Clone)]
pub struct PartitionManager {
    shell: Shell,
}

/// Parse the last `Free Space` line of `parted unit MB print free`.
fn parse_free_space(line: &str) -> Option<(f64, f64)> {
    let mut fields = line.split_whitespace();
    let start = fields.next()?.trim_end_matches("MB").parse::<f64>().ok()?;
    let end = fields.next()?.trim_end_matches("MB").parse::<f64>().ok()?;
    Some((start, end))
}

impl PartitionManager {
    pub fn new(shell: Shell) -> Self {
        Self { shell }
    }

    pub async fn create_label(&self, drive: &str) -> Result<()> {
        self.shell
            .check(&format!("parted -s {drive} mklabel gpt"))
            .await?;
        Ok(())
    }

    /// Create a partition at the start of the largest trailing free region.
    /// `size_mb == None` uses all of it.
    pub async fn create(&self, drive: &str, size_mb: Option<u64>) -> Result<()> {
        debug!("Creating partition on {} of size {:?} MB", drive, size_mb);
        let probe = format!("parted -s {drive} unit MB print free | grep Free | tail -n 1");
        let out = self.shell.check(&probe).await?;
        let (start, end) = parse_free_space(&out.stdout).ok_or_else(|| Error::CommandFailed {
            command: probe.clone(),
            stderr: format!("no free space reported on {drive}"),
        })?;

        let start = start.max(1.0);
        let end = match size_mb {
            Some(size) => start + size as f64,
            None => end,
        };
        self.shell
            .check(&format!("parted -s {drive} mkpart primary {start}MB {end}MB"))
            .await?;
        Ok(())
    }

    /// Create the metadata partition (with a fresh label) then the data
    /// partition on every drive.
    pub async fn create_layout(&self, drives: &[String], metadata_mb: u64) -> Result<()> {
        for drive in drives {
            self.create_label(drive).await?;
            self.create(drive, Some(metadata_mb)).await?;
        }
        for drive in drives {
            self.create(drive, None).await?;
        }
        Ok(())
    }

    /// Delete every partition on every drive, continuing past failures.
    pub async fn reset(&self, drives: &[String]) -> CommandOutput {
        let mut combined = CommandOutput::ok();
        for drive in drives {
            let listing = self
                .shell
                .run(&format!("parted -s {drive} print 2>/dev/null | awk '/^ / {{print $1}}'"))
                .await;
            if !listing.success() {
                continue;
            }
            for number in listing.stdout.split_whitespace() {
                let out = self.shell.run(&format!("parted -s {drive} rm {number}")).await;
                if !out.success() {
                    combined.exit_code = 1;
                    combined.stderr.push_str(&out.stderr);
                }
            }
        }
        combined
    }

    /// `sfdisk -d` dump of the drive's table.
    pub async fn dump(&self, drive: &str) -> Result<String> {
        Ok(self.shell.check(&format!("sfdisk -d {drive}")).await?.stdout)
    }

    /// Re-apply a table from a dump file and force a re-read.
    pub async fn apply(&self, drive: &str, dump_file: &Path) -> Result<()> {
        self.shell
            .check(&format!("sfdisk {drive} < {}", dump_file.display()))
            .await?;
        self.shell.check(&format!("partprobe {drive}")).await?;
        Ok(())
    }

    /// True when both expected partitions are visible.
    pub async fn has_partitions(&self, first: &str, second: &str) -> bool {
        self.shell.run(&format!("ls {first} {second}")).await.success()
    }
}
