//! Hardware Discovery Components
//!
//! Drive enumeration for the two bus types a Bryck can be built from.

pub mod nvme;
pub mod sata;
pub mod scanner;

use serde::{Deserialize, Serialize};

// =============================================================================
// Drive Types
// =============================================================================

/// Bus type of the Bryck drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DriveType {
    /// NVMe SSD (`/dev/nvmeXnY`, partitions `pN`)
    Nvme,
    /// SATA SSD (`/dev/sdX`, partitions `N`)
    Sata,
}

impl DriveType {
    /// Name of partition `index` (1-based) on `device`.
    pub fn partition_name(&self, device: &str, index: u32) -> String {
        match self {
            DriveType::Nvme => format!("{device}p{index}"),
            DriveType::Sata => format!("{device}{index}"),
        }
    }
}

impl std::fmt::Display for DriveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriveType::Nvme => write!(f, "NVMe"),
            DriveType::Sata => write!(f, "SATA"),
        }
    }
}

// =============================================================================
// Drive Information
// =============================================================================

/// Information about a discovered Bryck drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveInfo {
    /// Device path (e.g., /dev/nvme0n1)
    pub device_path: String,
    /// Type of drive
    pub drive_type: DriveType,
    /// Device model name
    pub model: String,
    /// Serial number
    pub serial: String,
    /// Firmware revision (NVMe only)
    pub firmware: Option<String>,
    /// Total capacity in bytes
    pub capacity_bytes: u64,
}

impl DriveInfo {
    /// Get capacity in GiB
    pub fn capacity_gib(&self) -> f64 {
        self.capacity_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    /// Kernel name of the device (e.g., nvme0n1)
    pub fn kernel_name(&self) -> &str {
        self.device_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.device_path)
    }
}
