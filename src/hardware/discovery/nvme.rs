//! NVMe drive listing via `nvme list -o json`

use serde::Deserialize;

use super::{DriveInfo, DriveType};
use crate::error::{Error, Result};

/// Command used to enumerate NVMe namespaces.
pub const NVME_LIST_COMMAND: &str = "nvme list -o json";

#[derive(Debug, Deserialize)]
struct NvmeList {
    #[serde(rename = "Devices", default)]
    devices: Vec<NvmeDevice>,
}

#[derive(Debug, Deserialize)]
struct NvmeDevice {
    #[serde(rename = "DevicePath")]
    device_path: String,
    #[serde(rename = "ModelNumber", default)]
    model_number: String,
    #[serde(rename = "SerialNumber", default)]
    serial_number: String,
    #[serde(rename = "Firmware", default)]
    firmware: Option<String>,
    #[serde(rename = "PhysicalSize", default)]
    physical_size: u64,
}

/// Parse `nvme list -o json` output into drive records.
pub fn parse_nvme_list(json: &str) -> Result<Vec<DriveInfo>> {
    let list: NvmeList = serde_json::from_str(json)
        .map_err(|e| Error::Config(format!("unexpected nvme list output: {e}")))?;

    Ok(list
        .devices
        .into_iter()
        .map(|d| DriveInfo {
            device_path: d.device_path,
            drive_type: DriveType::Nvme,
            model: d.model_number.trim().to_string(),
            serial: d.serial_number.trim().to_string(),
            firmware: d.firmware.map(|f| f.trim().to_string()),
            capacity_bytes: d.physical_size,
        })
        .collect())
}
