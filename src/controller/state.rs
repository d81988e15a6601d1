//! Device set model, lifecycle states and read-only projections

use std::fmt;
use std::path::PathBuf;

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::hardware::{DriveInfo, DriveType};
use crate::tools::FilesystemUsage;

/// RAID level of the metadata array.
pub const METADATA_RAID_LEVEL: u8 = 1;

/// Default RAID level of the data array.
pub const DEFAULT_DATA_RAID_LEVEL: u8 = 5;

/// Data protection scheme recorded in the descriptor.
pub const DATA_PROTECTION_RAID: &str = "raid";

/// Subsystem string reported by `list` for every drive.
pub const DRIVE_SUBSYSTEMS: &str = "block:scsi:pci";

// =============================================================================
// Lifecycle State
// =============================================================================

/// Where a Bryck is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// No allow-listed drives present
    NotFound,
    /// No RAID, encryption mapping or mount active
    Ejected,
    /// RAID or encryption mappings active, nothing mounted
    Assembled,
    /// A Bryck filesystem is mounted
    Mounted,
    /// Mount in progress, possibly repairing headers or partition tables
    Recovering,
    /// The last operation failed
    Error,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::NotFound => write!(f, "NotFound"),
            LifecycleState::Ejected => write!(f, "Ejected"),
            LifecycleState::Assembled => write!(f, "Assembled"),
            LifecycleState::Mounted => write!(f, "Mounted"),
            LifecycleState::Recovering => write!(f, "Recovering"),
            LifecycleState::Error => write!(f, "Error"),
        }
    }
}

// =============================================================================
// Operation Options
// =============================================================================

/// Options for `format`
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Accepted for compatibility; authentication is tied to encryption
    pub no_auth: bool,
    pub no_encrypt: bool,
    pub no_erase: bool,
    /// Data array chunk size in MB; mdadm's default when `None`
    pub raid_chunk_mb: Option<u64>,
    pub raid_level: u8,
    pub key_file: Option<PathBuf>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            no_auth: false,
            no_encrypt: false,
            no_erase: false,
            raid_chunk_mb: None,
            raid_level: DEFAULT_DATA_RAID_LEVEL,
            key_file: None,
        }
    }
}

/// Options for `mount`
#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    pub key_file: Option<PathBuf>,
    pub mount_dir: Option<PathBuf>,
}

// =============================================================================
// Device Set
// =============================================================================

/// The drives of one Bryck and how they were formatted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSet {
    pub drive_type: DriveType,
    pub encryption: bool,
    pub data_protection: String,
    /// Known after format, a descriptor read, or reading the md superblocks
    pub data_raid_level: Option<u8>,
    pub metadata_raid_level: u8,
    pub format_time: Option<String>,
    pub timezone: Option<String>,
    pub serial_number: Option<String>,
    pub firmware_rev: String,
    /// Sum of drive sizes in GiB
    pub raw_capacity: f64,
    pub drives: Vec<DriveInfo>,
}

impl DeviceSet {
    pub fn from_drives(drive_type: DriveType, drives: Vec<DriveInfo>) -> Self {
        let firmware_rev = match drive_type {
            DriveType::Nvme => drives
                .first()
                .and_then(|d| d.firmware.clone())
                .unwrap_or_else(|| "1.0".to_string()),
            DriveType::Sata => "Firmware".to_string(),
        };
        Self {
            drive_type,
            encryption: false,
            data_protection: DATA_PROTECTION_RAID.to_string(),
            data_raid_level: None,
            metadata_raid_level: METADATA_RAID_LEVEL,
            format_time: None,
            timezone: None,
            serial_number: drives.first().map(|d| d.serial.clone()),
            firmware_rev,
            raw_capacity: drives.iter().map(DriveInfo::capacity_gib).sum(),
            drives,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.drives.is_empty()
    }

    pub fn serial(&self) -> &str {
        self.serial_number.as_deref().unwrap_or("")
    }

    /// Raw device paths, in discovery order.
    pub fn drive_paths(&self) -> Vec<String> {
        self.drives.iter().map(|d| d.device_path.clone()).collect()
    }

    /// Stamp the current local time.
    pub fn stamp_format_time(&mut self) {
        let now = Local::now();
        self.format_time = Some(now.format("%Y-%m-%d %H:%M:%S%.6f").to_string());
        self.timezone = Some(now.format("%Z").to_string());
    }

    /// Take the format-time fields from a descriptor read off the metadata
    /// filesystem. Discovered drives are kept.
    pub fn apply_descriptor(&mut self, descriptor: &MetadataDescriptor) {
        self.encryption = descriptor.encryption;
        self.data_protection = descriptor.data_protection.clone();
        self.data_raid_level = Some(descriptor.data_raid_level);
        self.metadata_raid_level = descriptor.metadata_raid_level;
        self.format_time = descriptor.format_time.clone();
        self.timezone = descriptor.timezone.clone();
        if descriptor.serial_number.is_some() {
            self.serial_number = descriptor.serial_number.clone();
        }
    }
}

// =============================================================================
// Metadata Descriptor
// =============================================================================

/// JSON document at the root of the metadata filesystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDescriptor {
    pub encryption: bool,
    pub data_protection: String,
    pub data_raid_level: u8,
    pub metadata_raid_level: u8,
    pub format_time: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    pub serial_number: Option<String>,
    #[serde(default)]
    pub drives: Vec<DriveInfo>,
}

impl MetadataDescriptor {
    pub fn from_device_set(set: &DeviceSet) -> Self {
        Self {
            encryption: set.encryption,
            data_protection: set.data_protection.clone(),
            data_raid_level: set.data_raid_level.unwrap_or(DEFAULT_DATA_RAID_LEVEL),
            metadata_raid_level: set.metadata_raid_level,
            format_time: set.format_time.clone(),
            timezone: set.timezone.clone(),
            serial_number: set.serial_number.clone(),
            drives: set.drives.clone(),
        }
    }

    /// Descriptor JSON with the keys of `overlay` merged over it.
    pub fn to_json(&self, overlay: Option<&Value>) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let (Some(Value::Object(extra)), Value::Object(base)) = (overlay, &mut value) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        } else if let Some(other) = overlay {
            if !other.is_object() {
                return Err(Error::Config(
                    "descriptor overlay must be a JSON object".into(),
                ));
            }
        }
        Ok(value)
    }
}

// =============================================================================
// Projections
// =============================================================================

/// What `info` reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BryckInfo {
    pub product_name: String,
    pub serial_number: String,
    pub firmware_rev: String,
    /// Raw capacity in GiB
    pub capacity: f64,
    pub device_path: String,
    pub encryption: bool,
    /// `None` when the level can't be read without unlocking the drives
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_raid_level: Option<u8>,
    pub metadata_raid_level: u8,
    pub drive_count: usize,
    pub state: LifecycleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<FilesystemUsage>,
}

impl BryckInfo {
    /// `Key: value` lines for the terminal.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("ProductName: {}\n", self.product_name));
        out.push_str(&format!("SerialNumber: {}\n", self.serial_number));
        out.push_str(&format!("FirmwareRev: {}\n", self.firmware_rev));
        out.push_str(&format!("Capacity: {:.2} GB\n", self.capacity));
        out.push_str(&format!("DevicePath: {}\n", self.device_path));
        out.push_str(&format!("Drives: {}\n", self.drive_count));
        out.push_str(&format!("Encryption: {}\n", self.encryption));
        if let Some(level) = self.data_raid_level {
            out.push_str(&format!("DataRaidLevel: {}\n", level));
        }
        out.push_str(&format!("MetadataRaidLevel: {}\n", self.metadata_raid_level));
        out.push_str(&format!("State: {}\n", self.state));

        if self.state == LifecycleState::Mounted {
            match &self.usage {
                Some(usage) => {
                    out.push_str(&format!("UsableCapacity: {} GB\n", usage.usable_capacity));
                    out.push_str(&format!("UsedSpace: {} GB\n", usage.used_space));
                    out.push_str(&format!("AvailableSpace: {} GB\n", usage.available_space));
                    out.push_str(&format!("Usage: {}\n", usage.usage));
                }
                None => out.push_str("Unable to read filesystem usage\n"),
            }
        }
        out
    }
}

/// One drive as reported by `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceListEntry {
    pub model: String,
    pub serial: String,
    pub size: u64,
    pub name: String,
    pub subsystems: String,
}

impl From<&DriveInfo> for DeviceListEntry {
    fn from(drive: &DriveInfo) -> Self {
        Self {
            model: drive.model.clone(),
            serial: drive.serial.clone(),
            size: drive.capacity_bytes,
            name: drive.device_path.clone(),
            subsystems: DRIVE_SUBSYSTEMS.to_string(),
        }
    }
}

/// What `list` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceList {
    #[serde(rename = "device-list")]
    pub device_list: Vec<DeviceListEntry>,
}

/// Drop `null` entries so an overlay can't blank required descriptor keys.
pub(crate) fn overlay_from_str(text: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(text)?;
    match value {
        Value::Object(map) => Ok(Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .collect::<Map<String, Value>>(),
        )),
        _ => Err(Error::Config(
            "descriptor overlay must be a JSON object".into(),
        )),
    }
}
