//! Artifact restorers
//!
//! The two restore actions the recovery reader can be built with.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{Artifact, RecordType};
use crate::domain::ports::ArtifactRestorer;
use crate::error::{Error, Result};
use crate::tools::{CryptManager, PartitionManager};

fn wrong_artifact(expected: &str, drive: &str, artifact: &Artifact) -> Error {
    Error::Config(format!(
        "expected a {expected} for {drive}, found {artifact:?}"
    ))
}

/// Puts a backed-up LUKS header back onto a raw drive.
#[derive(Debug, Clone)]
pub struct LuksHeaderRestorer {
    crypt: CryptManager,
}

impl LuksHeaderRestorer {
    pub fn new(crypt: CryptManager) -> Self {
        Self { crypt }
    }
}

#[async_trait]
impl ArtifactRestorer for LuksHeaderRestorer {
    fn record_type(&self) -> RecordType {
        RecordType::Encryption
    }

    async fn restore_one(&self, drive: &str, artifact: &Artifact) -> Result<()> {
        match artifact {
            Artifact::HeaderFile(file) => self.crypt.restore_header(drive, file).await,
            other => Err(wrong_artifact("header backup file", drive, other)),
        }
    }
}

/// Re-applies an `sfdisk -d` dump to an unlocked drive.
#[derive(Debug, Clone)]
pub struct PartitionTableRestorer {
    partitions: PartitionManager,
    tmp_dir: PathBuf,
}

impl PartitionTableRestorer {
    pub fn new(partitions: PartitionManager, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            partitions,
            tmp_dir: tmp_dir.into(),
        }
    }
}

#[async_trait]
impl ArtifactRestorer for PartitionTableRestorer {
    fn record_type(&self) -> RecordType {
        RecordType::Partition
    }

    async fn restore_one(&self, drive: &str, artifact: &Artifact) -> Result<()> {
        let dump = match artifact {
            Artifact::PartitionTable(dump) => dump,
            other => return Err(wrong_artifact("partition table dump", drive, other)),
        };

        let file = self
            .tmp_dir
            .join(format!("bryck-{}.sfdisk", uuid::Uuid::new_v4()));
        tokio::fs::write(&file, dump).await?;
        debug!("Applying partition table for {} from {}", drive, file.display());

        let result = self.partitions.apply(drive, &file).await;
        if let Err(e) = tokio::fs::remove_file(&file).await {
            debug!("Could not remove {}: {}", file.display(), e);
        }
        result
    }
}
