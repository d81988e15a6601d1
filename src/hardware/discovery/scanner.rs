//! Bryck drive scanner
//!
//! Lists every drive on the configured bus and keeps the ones whose model
//! is on the allow-list.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::nvme::{parse_nvme_list, NVME_LIST_COMMAND};
use super::sata::{parse_lsblk, LSBLK_COMMAND};
use super::{DriveInfo, DriveType};
use crate::config::BryckConfig;
use crate::domain::ports::{CommandRunner, DriveEnumerator};
use crate::error::Result;

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Bus to enumerate
    pub drive_type: DriveType,
    /// Allowed model numbers
    pub models: Vec<String>,
    /// NVMe device paths containing this pattern are skipped
    pub excluded_path_pattern: String,
}

impl ScannerConfig {
    pub fn from_config(config: &BryckConfig) -> Self {
        Self {
            drive_type: config.drive_type,
            models: config.drive_models.clone(),
            excluded_path_pattern: config.excluded_path_pattern.clone(),
        }
    }

    fn accepts(&self, drive: &DriveInfo) -> bool {
        let model = drive.model.trim();
        if !self.models.iter().any(|m| m.trim() == model) {
            return false;
        }
        match self.drive_type {
            DriveType::Nvme => {
                self.excluded_path_pattern.is_empty()
                    || !drive.device_path.contains(&self.excluded_path_pattern)
            }
            DriveType::Sata => true,
        }
    }
}

/// Enumerates Bryck drives through the host's listing tools
pub struct DriveScanner {
    config: ScannerConfig,
    runner: Arc<dyn CommandRunner>,
}

impl DriveScanner {
    pub fn new(config: ScannerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Apply the allow-list to an unfiltered listing.
    pub fn filter(&self, drives: Vec<DriveInfo>) -> Vec<DriveInfo> {
        drives
            .into_iter()
            .filter(|d| self.config.accepts(d))
            .collect()
    }

    async fn list_all(&self) -> Result<Vec<DriveInfo>> {
        let (command, parse): (&str, fn(&str) -> Result<Vec<DriveInfo>>) =
            match self.config.drive_type {
                DriveType::Nvme => (NVME_LIST_COMMAND, parse_nvme_list),
                DriveType::Sata => (LSBLK_COMMAND, parse_lsblk),
            };

        debug!("Listing all {} drives in the system", self.config.drive_type);
        let output = self.runner.execute(command).await.check(command)?;
        parse(&output.stdout)
    }
}

#[async_trait]
impl DriveEnumerator for DriveScanner {
    async fn list_drives(&self) -> Result<Vec<DriveInfo>> {
        let drives = match self.list_all().await {
            Ok(drives) => drives,
            Err(e) => {
                warn!("Drive listing failed, treating as no Bryck present: {}", e);
                Vec::new()
            }
        };

        let bryck_drives = self.filter(drives);
        debug!("Found {} Bryck drives", bryck_drives.len());
        Ok(bryck_drives)
    }
}
