//! SATA drive listing via `lsblk --json`

use serde::Deserialize;
use serde_json::Value;

use super::{DriveInfo, DriveType};
use crate::error::{Error, Result};

/// Command used to enumerate SATA block devices.
pub const LSBLK_COMMAND: &str = "lsblk -o KNAME,TYPE,SIZE,SERIAL,MODEL,SUBSYSTEMS --json -b";

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    kname: String,
    #[serde(rename = "type", default)]
    device_type: Option<String>,
    #[serde(default)]
    size: Value,
    #[serde(default)]
    serial: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

/// lsblk prints sizes as numbers in recent releases and as strings in older ones.
fn size_bytes(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Parse `lsblk --json -b` output into drive records (whole disks only).
pub fn parse_lsblk(json: &str) -> Result<Vec<DriveInfo>> {
    let output: LsblkOutput = serde_json::from_str(json)
        .map_err(|e| Error::Config(format!("unexpected lsblk output: {e}")))?;

    Ok(output
        .blockdevices
        .into_iter()
        .filter(|d| d.device_type.as_deref().map_or(true, |t| t == "disk"))
        .map(|d| DriveInfo {
            device_path: format!("/dev/{}", d.kname),
            drive_type: DriveType::Sata,
            model: d.model.unwrap_or_default().trim().to_string(),
            serial: d.serial.unwrap_or_default().trim().to_string(),
            firmware: None,
            capacity_bytes: size_bytes(&d.size),
        })
        .collect())
}
