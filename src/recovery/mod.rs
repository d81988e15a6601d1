//! Recovery Metadata
//!
//! Snapshots of the artifacts needed to bring a damaged Bryck back: LUKS
//! header backups and partition table dumps.
//!
//! # Components
//!
//! - [`RecordStore`] - in-memory records, checksummed and written one type at a time
//! - [`codec`] - the base64 + MD5 on-disk record format
//! - [`RecoveryReader`] - scans a backup directory and restores artifacts
//! - [`LuksHeaderRestorer`] / [`PartitionTableRestorer`] - per-artifact restore actions
//!
//! # Record File Format
//!
//! ```text
//! base64( {"<type>": {"checksum": md5, "description": .., "entries": {drive: artifact},
//!                     "filename": .., "id": ..}} )
//! ```
//!
//! The checksum covers every record that was in the store when the file
//! was written, serialized with sorted keys and the checksum field absent.

pub mod codec;
pub mod reader;
pub mod restore;
pub mod store;

#[cfg(test)]
mod proptest;

pub use reader::{RecoveryReader, ScanReport};
pub use restore::{LuksHeaderRestorer, PartitionTableRestorer};
pub use store::RecordStore;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// Default record file for LUKS header backups, inside the backup directory.
pub const ENCRYPTION_RECORD_FILE: &str = "estream.bin";

/// Default record file for partition table dumps, inside the backup directory.
pub const PARTITION_RECORD_FILE: &str = "pstream.bin";

// =============================================================================
// Record Types
// =============================================================================

/// Tag naming what kind of artifact a record holds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordType {
    /// LUKS header backup files
    Encryption,
    /// Inline `sfdisk -d` dumps
    Partition,
    /// Any other tag; artifacts are kept opaque
    Custom(String),
}

impl RecordType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "encryption" => RecordType::Encryption,
            "partition" => RecordType::Partition,
            other => RecordType::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecordType::Encryption => "encryption",
            RecordType::Partition => "partition",
            RecordType::Custom(tag) => tag,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RecordType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RecordType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let tag = String::deserialize(d)?;
        Ok(RecordType::from_tag(&tag))
    }
}

// =============================================================================
// Artifacts
// =============================================================================

/// One backed-up artifact. Stored as a plain JSON string on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Path of a `luksHeaderBackup` file
    HeaderFile(PathBuf),
    /// Full `sfdisk -d` output
    PartitionTable(String),
    /// Value of a custom record type
    Opaque(String),
}

impl Artifact {
    /// Interpret a wire string according to the record type it belongs to.
    pub fn from_wire(record_type: &RecordType, value: String) -> Self {
        match record_type {
            RecordType::Encryption => Artifact::HeaderFile(PathBuf::from(value)),
            RecordType::Partition => Artifact::PartitionTable(value),
            RecordType::Custom(_) => Artifact::Opaque(value),
        }
    }

    pub fn to_wire(&self) -> String {
        match self {
            Artifact::HeaderFile(path) => path.to_string_lossy().into_owned(),
            Artifact::PartitionTable(dump) => dump.clone(),
            Artifact::Opaque(value) => value.clone(),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// A typed, keyed collection of artifacts owned by one Bryck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    pub description: Option<String>,
    /// Where `persist` writes this record
    pub filename: PathBuf,
    /// Drive identifier -> artifact
    pub entries: BTreeMap<String, Artifact>,
}

#[derive(Deserialize)]
struct WireRecord {
    id: String,
    #[serde(default)]
    description: Option<String>,
    filename: String,
    /// Older tooling called the map `data`
    #[serde(alias = "data")]
    entries: BTreeMap<String, String>,
}

impl Record {
    pub fn new(id: impl Into<String>, description: Option<String>, filename: PathBuf) -> Self {
        Self {
            id: id.into(),
            description,
            filename,
            entries: BTreeMap::new(),
        }
    }

    /// Wire form without a checksum.
    pub fn to_value(&self) -> Value {
        let entries: serde_json::Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.to_wire())))
            .collect();
        json!({
            "id": self.id,
            "description": self.description,
            "filename": self.filename.to_string_lossy(),
            "entries": entries,
        })
    }

    /// Build a record from its wire form; a `checksum` field is ignored.
    pub fn from_value(record_type: &RecordType, value: Value) -> Result<Self> {
        let wire: WireRecord = serde_json::from_value(value)?;
        Ok(Self {
            id: wire.id,
            description: wire.description,
            filename: PathBuf::from(wire.filename),
            entries: wire
                .entries
                .into_iter()
                .map(|(k, v)| (k, Artifact::from_wire(record_type, v)))
                .collect(),
        })
    }

    pub fn get(&self, key: &str) -> Result<&Artifact> {
        self.entries
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("no entry for {key}")))
    }
}
