//! Software RAID (mdadm)

use tracing::{debug, info};

use super::Shell;
use crate::domain::ports::CommandOutput;
use crate::error::Result;

/// Creates, stops and assembles the Bryck md arrays.
#[derive(Debug, Clone)]
pub struct RaidManager {
    shell: Shell,
}

impl RaidManager {
    pub fn new(shell: Shell) -> Self {
        Self { shell }
    }

    /// Kernel device behind a named array (`/dev/md/bryck_data` -> `/dev/md127`),
    /// or `None` when the array is not running.
    pub async fn device(&self, raid: &str) -> Option<String> {
        let out = self.shell.run(&format!("ls -l {raid}")).await;
        if !out.success() {
            return None;
        }
        let target = out.stdout.trim().rsplit('/').next().unwrap_or("").trim();
        if target.is_empty() {
            None
        } else {
            Some(format!("/dev/{target}"))
        }
    }

    /// Stop an array; stopping one that is not running is a success.
    pub async fn stop(&self, raid: &str) -> Result<()> {
        if self.device(raid).await.is_none() {
            debug!("RAID {} not running", raid);
            return Ok(());
        }
        debug!("Stopping RAID {}", raid);
        self.shell.check(&format!("mdadm --stop {raid}")).await?;
        Ok(())
    }

    /// Stop the array and wipe md superblocks from its members.
    pub async fn reset(&self, raid: &str, members: &[String]) -> CommandOutput {
        debug!("Resetting RAID {} on {}", raid, members.join(","));
        self.shell.attempt(&format!("mdadm --stop {raid}")).await;
        self.shell
            .run(&format!("mdadm --zero-superblock {}", members.join(" ")))
            .await
    }

    /// Build a fresh array over `members`. `chunk_mb` sets the stripe chunk.
    pub async fn create(
        &self,
        raid: &str,
        members: &[String],
        level: u8,
        chunk_mb: Option<u64>,
    ) -> Result<()> {
        let out = self.reset(raid, members).await;
        if !out.success() {
            debug!(
                raid = %raid,
                stderr = %out.stderr.trim(),
                "Superblock wipe failed before create"
            );
        }
        info!(
            "Creating RAID {} level {} over {} devices",
            raid,
            level,
            members.len()
        );
        let chunk = chunk_mb
            .map(|mb| format!(" --chunk={}K", mb * 1024))
            .unwrap_or_default();
        let command = format!(
            "yes | mdadm --create {raid} --level={level} --raid-devices={}{chunk} {}",
            members.len(),
            members.join(" ")
        );
        self.shell.check(&command).await?;
        Ok(())
    }

    /// RAID level of a running array, from `mdadm --detail`.
    pub async fn level(&self, raid: &str) -> Option<u8> {
        let out = self.shell.run(&format!("mdadm --detail {raid}")).await;
        if !out.success() {
            return None;
        }
        parse_raid_level(&out.stdout)
    }

    /// RAID level recorded in a member's md superblock. Works while the
    /// array is stopped.
    pub async fn examine_level(&self, member: &str) -> Option<u8> {
        let out = self.shell.run(&format!("mdadm --examine {member}")).await;
        if !out.success() {
            return None;
        }
        parse_raid_level(&out.stdout)
    }

    /// Scan for and activate every known array. When the scan fails the
    /// arrays are registered in mdadm.conf instead.
    pub async fn assemble(&self) -> Result<()> {
        debug!("Assembling RAID arrays");
        let out = self.shell.run("mdadm --assemble --scan").await;
        if out.success() {
            return Ok(());
        }
        self.shell
            .check("mdadm --examine --scan | tee -a /etc/mdadm/mdadm.conf")
            .await?;
        Ok(())
    }
}

/// Level from a `Raid Level : raid6` line.
fn parse_raid_level(text: &str) -> Option<u8> {
    text.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim() != "Raid Level" {
            return None;
        }
        value.trim().strip_prefix("raid")?.parse().ok()
    })
}
