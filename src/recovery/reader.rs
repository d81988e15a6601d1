//! Recovery Reader
//!
//! Loads every valid record file from a backup directory and restores
//! single artifacts through an [`ArtifactRestorer`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use super::codec;
use super::{Record, RecordType};
use crate::domain::ports::ArtifactRestorer;
use crate::error::{Error, Result};

/// Outcome of scanning a backup directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub success_count: usize,
    pub error_count: usize,
    /// Files that failed to decode or validate, in listing order
    pub error_files: Vec<PathBuf>,
    /// Checksummed type of each valid file, in listing order
    pub discovered_types: Vec<RecordType>,
}

impl ScanReport {
    pub fn contains(&self, record_type: &RecordType) -> bool {
        self.discovered_types.contains(record_type)
    }
}

/// Reads record files and restores the artifacts they describe.
#[derive(Debug)]
pub struct RecoveryReader<R> {
    restorer: R,
    records: BTreeMap<RecordType, Record>,
}

impl<R: ArtifactRestorer> RecoveryReader<R> {
    pub fn new(restorer: R) -> Self {
        Self {
            restorer,
            records: BTreeMap::new(),
        }
    }

    /// Decode every regular file in `dir`. Corrupt files are counted, not
    /// fatal; only an unreadable directory is an error.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub async fn scan(&mut self, dir: &Path) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        let mut listing = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = listing.next_entry().await? {
            let path = entry.path();
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {}
                _ => continue,
            }

            match self.load(&path).await {
                Ok(record_type) => {
                    debug!("Valid {} record in {}", record_type, path.display());
                    report.success_count += 1;
                    report.discovered_types.push(record_type);
                }
                Err(e) => {
                    warn!("Skipping record file: {}", e);
                    report.error_count += 1;
                    report.error_files.push(path);
                }
            }
        }

        info!(
            valid = report.success_count,
            corrupt = report.error_count,
            "Scanned recovery records"
        );
        Ok(report)
    }

    async fn load(&mut self, path: &Path) -> Result<RecordType> {
        let bytes = tokio::fs::read(path).await?;
        let contents = String::from_utf8(bytes).map_err(|e| Error::ValidationFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let decoded = codec::decode(&contents, path)?;
        self.records.extend(decoded.records);
        Ok(decoded.record_type)
    }

    pub fn restorer(&self) -> &R {
        &self.restorer
    }

    pub fn has_type(&self, record_type: &RecordType) -> bool {
        self.records.contains_key(record_type)
    }

    pub fn record(&self, record_type: &RecordType) -> Option<&Record> {
        self.records.get(record_type)
    }

    /// Restore the artifact stored under `key` onto drive `key`.
    pub async fn restore(&self, record_type: &RecordType, key: &str) -> Result<()> {
        if *record_type != self.restorer.record_type() {
            return Err(Error::Config(format!(
                "no restorer for {record_type} records"
            )));
        }
        let artifact = self
            .records
            .get(record_type)
            .ok_or_else(|| Error::NotFound(format!("no {record_type} record loaded")))?
            .get(key)?;

        info!("Restoring {} for {}", record_type, key);
        self.restorer.restore_one(key, artifact).await
    }

    /// Restore every key; failures are collected rather than stopping early.
    pub async fn restore_many(&self, record_type: &RecordType, keys: &[String]) -> Result<()> {
        let mut failed = Vec::new();
        let mut stderr = String::new();
        for key in keys {
            if let Err(e) = self.restore(record_type, key).await {
                failed.push(key.clone());
                stderr.push_str(&e.to_string());
                stderr.push('\n');
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::PartialFailure {
                failed,
                stderr: stderr.trim_end().to_string(),
            })
        }
    }
}
