//! Record Store
//!
//! Records are created empty, filled with one entry per drive and then
//! persisted. Persisting a type writes its file and drops it from memory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::codec;
use super::{Artifact, Record, RecordType};
use crate::error::{Error, Result};

/// In-memory collection of recovery records keyed by type.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: BTreeMap<RecordType, Record>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an empty record, replacing any live record of the same type.
    pub fn create(
        &mut self,
        record_type: RecordType,
        id: impl Into<String>,
        description: Option<String>,
        filename: impl Into<PathBuf>,
    ) {
        debug!("Creating {} record", record_type);
        self.records
            .insert(record_type, Record::new(id, description, filename.into()));
    }

    fn record_mut(&mut self, record_type: &RecordType) -> Result<&mut Record> {
        self.records
            .get_mut(record_type)
            .ok_or_else(|| Error::NotFound(format!("record type {record_type}")))
    }

    pub fn put(&mut self, record_type: &RecordType, key: impl Into<String>, artifact: Artifact) -> Result<()> {
        self.record_mut(record_type)?.entries.insert(key.into(), artifact);
        Ok(())
    }

    pub fn get(&self, record_type: &RecordType, key: &str) -> Result<&Artifact> {
        self.records
            .get(record_type)
            .ok_or_else(|| Error::NotFound(format!("record type {record_type}")))?
            .get(key)
    }

    /// Remove an entry. A missing key is not an error; a missing type is.
    pub fn remove(&mut self, record_type: &RecordType, key: &str) -> Result<()> {
        self.record_mut(record_type)?.entries.remove(key);
        Ok(())
    }

    pub fn dump(&self, record_type: &RecordType) -> Option<&Record> {
        self.records.get(record_type)
    }

    pub fn contains(&self, record_type: &RecordType) -> bool {
        self.records.contains_key(record_type)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whole-store wire value, no checksum.
    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .records
            .iter()
            .map(|(t, r)| (t.as_str().to_string(), r.to_value()))
            .collect();
        Value::Object(map)
    }

    /// Digest over every live record.
    pub fn checksum(&self) -> Result<String> {
        codec::digest(&self.to_value())
    }

    /// Base64 file contents for `record_type`, checksummed over the whole store.
    pub fn encode(&self, record_type: &RecordType) -> Result<String> {
        if !self.contains(record_type) {
            return Err(Error::NotFound(format!("record type {record_type}")));
        }
        codec::encode(&self.to_value(), record_type)
    }

    /// Write `record_type` to its file and evict it. The record stays live
    /// if the write fails.
    pub async fn persist(&mut self, record_type: &RecordType) -> Result<PathBuf> {
        let encoded = self.encode(record_type)?;
        let filename = self.record_mut(record_type)?.filename.clone();

        write_file(&filename, encoded.as_bytes()).await?;
        self.records.remove(record_type);

        info!("Persisted {} record to {}", record_type, filename.display());
        Ok(filename)
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    tokio::fs::write(path, contents).await?;
    Ok(())
}
