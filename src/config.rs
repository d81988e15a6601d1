//! Bryck static configuration
//!
//! A single `BryckConfig` value is loaded once by the CLI and handed to the
//! controller. Every field has a default so a partial JSON file is enough.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hardware::DriveType;

/// Configuration for a Bryck host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BryckConfig {
    /// Identifier stamped into every recovery record
    pub id: String,

    /// Product name reported by `info`
    pub product_name: String,

    /// Bus type of the Bryck drives
    pub drive_type: DriveType,

    /// Model numbers that identify Bryck drives
    pub drive_models: Vec<String>,

    /// NVMe device paths containing this pattern are skipped (controller char devices)
    pub excluded_path_pattern: String,

    /// RAID device holding the data filesystem
    pub data_raid_device: String,

    /// RAID device holding the metadata filesystem
    pub metadata_raid_device: String,

    /// Where the metadata filesystem is mounted
    pub metadata_mount: PathBuf,

    /// Size of the metadata partition on each drive, in MB
    pub metadata_part_size_mb: u64,

    /// Descriptor file name at the metadata filesystem root
    pub metadata_file_name: String,

    /// Recovery backup directory, relative to the metadata mount
    pub backup_dir: String,

    /// Header backup directory, relative to the backup directory
    pub enc_dir: String,

    /// Scratch directory for temporary artifact files
    pub tmp_dir: PathBuf,

    /// Optional JSON object merged into the metadata descriptor
    pub descriptor_overlay: Option<PathBuf>,

    /// Optional BSMB store JSON copied onto the metadata filesystem at format
    pub bsmb_store: Option<PathBuf>,

    /// File name of the BSMB store copy at the metadata filesystem root
    pub metadata_bsmb_file_name: String,

    /// Fan-out worker bound (defaults to 80% of logical cores)
    pub max_workers: Option<usize>,

    /// How long to wait for a RAID device node to appear, in milliseconds
    pub device_wait_timeout_ms: u64,

    /// Poll interval while waiting for a device node, in milliseconds
    pub device_wait_interval_ms: u64,
}

impl Default for BryckConfig {
    fn default() -> Self {
        Self {
            id: "bryck".to_string(),
            product_name: "Bryck".to_string(),
            drive_type: DriveType::Nvme,
            drive_models: vec!["Micron_9300_MTFDHAL7T6TDP".to_string()],
            excluded_path_pattern: "c1".to_string(),
            data_raid_device: "/dev/md/bryck_data".to_string(),
            metadata_raid_device: "/dev/md/bryck_meta".to_string(),
            metadata_mount: PathBuf::from("/mnt/bryck_meta"),
            metadata_part_size_mb: 1024,
            metadata_file_name: "bryck.json".to_string(),
            backup_dir: "backup/".to_string(),
            enc_dir: "enc/".to_string(),
            tmp_dir: std::env::temp_dir(),
            descriptor_overlay: None,
            bsmb_store: None,
            metadata_bsmb_file_name: "bsmb.json".to_string(),
            max_workers: None,
            device_wait_timeout_ms: 16_000,
            device_wait_interval_ms: 32,
        }
    }
}

impl BryckConfig {
    /// Load a configuration file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: BryckConfig = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("invalid {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the controller cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.data_raid_device.is_empty() || self.metadata_raid_device.is_empty() {
            return Err(Error::Config("RAID device names must not be empty".into()));
        }
        if self.data_raid_device == self.metadata_raid_device {
            return Err(Error::Config(
                "data and metadata RAID devices must differ".into(),
            ));
        }
        if self.metadata_part_size_mb == 0 {
            return Err(Error::Config("metadata partition size must be non-zero".into()));
        }
        if self.drive_models.is_empty() {
            return Err(Error::Config("at least one drive model is required".into()));
        }
        if self.max_workers == Some(0) {
            return Err(Error::Config("max_workers must be at least 1".into()));
        }
        Ok(())
    }

    /// Recovery backup directory inside the mounted metadata filesystem
    pub fn backup_path(&self) -> PathBuf {
        self.metadata_mount.join(&self.backup_dir)
    }

    /// Header backup directory inside the backup directory
    pub fn header_backup_path(&self) -> PathBuf {
        self.backup_path().join(&self.enc_dir)
    }

    /// Metadata descriptor file inside the mounted metadata filesystem
    pub fn descriptor_path(&self) -> PathBuf {
        self.metadata_mount.join(&self.metadata_file_name)
    }

    pub fn bsmb_copy_path(&self) -> PathBuf {
        self.metadata_mount.join(&self.metadata_bsmb_file_name)
    }

    pub fn device_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.device_wait_timeout_ms)
    }

    pub fn device_wait_interval(&self) -> Duration {
        Duration::from_millis(self.device_wait_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BryckConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.drive_type, DriveType::Nvme);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: BryckConfig =
            serde_json::from_str(r#"{"drive_type": "SATA", "metadata_part_size_mb": 512}"#)
                .unwrap();
        assert_eq!(config.drive_type, DriveType::Sata);
        assert_eq!(config.metadata_part_size_mb, 512);
        assert_eq!(config.data_raid_device, "/dev/md/bryck_data");
    }

    #[test]
    fn test_validate_rejects_shared_raid_device() {
        let config = BryckConfig {
            metadata_raid_device: "/dev/md/bryck_data".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_backup_paths_nest_under_metadata_mount() {
        let config = BryckConfig {
            metadata_mount: PathBuf::from("/mnt/meta"),
            ..Default::default()
        };
        assert_eq!(config.backup_path(), PathBuf::from("/mnt/meta/backup/"));
        assert_eq!(
            config.header_backup_path(),
            PathBuf::from("/mnt/meta/backup/enc/")
        );
        assert_eq!(config.descriptor_path(), PathBuf::from("/mnt/meta/bryck.json"));
        assert_eq!(config.bsmb_copy_path(), PathBuf::from("/mnt/meta/bsmb.json"));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = BryckConfig::load("/nonexistent/bryck-config.json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
