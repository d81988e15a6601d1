//! Backup snapshots taken at format time and the self-healing steps of
//! mount that consume them.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::BryckController;
use crate::domain::events::{CorruptionKind, LifecycleEvent};
use crate::error::{Error, Result};
use crate::recovery::{
    Artifact, LuksHeaderRestorer, PartitionTableRestorer, RecordStore, RecordType,
    RecoveryReader, ENCRYPTION_RECORD_FILE, PARTITION_RECORD_FILE,
};
use crate::tools::basename;

impl BryckController {
    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Back up every drive's LUKS header and persist the `encryption`
    /// record. Drives whose backup failed are left out of the record and
    /// reported afterwards.
    pub(super) async fn snapshot_headers(&self, drives: &[String]) -> Result<PathBuf> {
        let enc_dir = self.config.header_backup_path();
        tokio::fs::create_dir_all(&enc_dir).await?;

        let crypt = &self.crypt;
        let enc_dir = enc_dir.as_path();
        let results = self
            .fanout
            .run(drives, move |drive| async move {
                let file = enc_dir.join(format!("{}.bin", basename(drive)));
                crypt.backup_header(drive, &file).await.map(|()| file)
            })
            .await;

        let mut store = RecordStore::new();
        store.create(
            RecordType::Encryption,
            &self.config.id,
            None,
            self.config.backup_path().join(ENCRYPTION_RECORD_FILE),
        );
        let entries = drives
            .iter()
            .zip(results)
            .map(|(drive, result)| (drive.clone(), result.map(Artifact::HeaderFile)));
        self.persist_snapshot(&mut store, &RecordType::Encryption, entries)
            .await
    }

    /// Dump every drive's partition table and persist the `partition`
    /// record.
    pub(super) async fn snapshot_partition_tables(&self, drives: &[String]) -> Result<PathBuf> {
        let partitions = &self.partitions;
        let results = self
            .fanout
            .run(drives, move |drive| partitions.dump(drive))
            .await;

        let mut store = RecordStore::new();
        store.create(
            RecordType::Partition,
            &self.config.id,
            None,
            self.config.backup_path().join(PARTITION_RECORD_FILE),
        );
        let entries = drives
            .iter()
            .zip(results)
            .map(|(drive, result)| (drive.clone(), result.map(Artifact::PartitionTable)));
        self.persist_snapshot(&mut store, &RecordType::Partition, entries)
            .await
    }

    async fn persist_snapshot(
        &self,
        store: &mut RecordStore,
        record_type: &RecordType,
        entries: impl Iterator<Item = (String, Result<Artifact>)>,
    ) -> Result<PathBuf> {
        let mut failed = Vec::new();
        let mut errors = String::new();
        for (drive, artifact) in entries {
            match artifact {
                Ok(artifact) => store.put(record_type, drive, artifact)?,
                Err(e) => {
                    warn!("No {} backup for {}: {}", record_type, drive, e);
                    errors.push_str(&e.to_string());
                    errors.push('\n');
                    failed.push(drive);
                }
            }
        }

        let path = store.persist(record_type).await?;
        if failed.is_empty() {
            Ok(path)
        } else {
            Err(Error::PartialFailure {
                failed,
                stderr: errors.trim_end().to_string(),
            })
        }
    }

    // =========================================================================
    // Self-healing
    // =========================================================================

    /// Restore damaged LUKS headers from the snapshot and unlock the
    /// repaired drives. `corruption` is the error that triggered recovery.
    pub(super) async fn recover_encryption_headers(
        &mut self,
        drives: &[String],
        key_file: &Path,
        corruption: Error,
    ) -> Result<()> {
        let kind = CorruptionKind::EncryptionHeader;
        warn!(drives = %drives.join(","), "Encryption header corruption detected");
        self.emit(LifecycleEvent::corruption_detected(
            self.device_set.serial(),
            kind,
            drives.to_vec(),
        ))
        .await;

        let result = self.restore_headers(drives, key_file).await;
        self.conclude_recovery(kind, drives, result, corruption).await
    }

    async fn restore_headers(&self, drives: &[String], key_file: &Path) -> Result<()> {
        let mut reader = RecoveryReader::new(LuksHeaderRestorer::new(self.crypt.clone()));
        let report = reader.scan(&self.config.backup_path()).await?;
        if !report.contains(&RecordType::Encryption) {
            return Err(Error::NotFound("no valid encryption header backup".into()));
        }
        reader.restore_many(&RecordType::Encryption, drives).await?;

        let crypt = &self.crypt;
        self.fanout
            .run_commands(drives, move |d| crypt.unlock_raw(d, key_file))
            .await
            .into_result()?;
        Ok(())
    }

    /// Re-apply partition tables from the snapshot to unlocked drives that
    /// are missing their partitions.
    pub(super) async fn recover_partition_tables(&mut self, drives: &[String]) -> Result<()> {
        let kind = CorruptionKind::PartitionTable;
        warn!(drives = %drives.join(","), "Partition table corruption detected");
        self.emit(LifecycleEvent::corruption_detected(
            self.device_set.serial(),
            kind,
            drives.to_vec(),
        ))
        .await;

        let corruption = Error::NotFound(format!("partitions on {}", drives.join(",")));
        let result = self.restore_partition_tables(drives).await;
        self.conclude_recovery(kind, drives, result, corruption).await
    }

    async fn restore_partition_tables(&self, drives: &[String]) -> Result<()> {
        let restorer =
            PartitionTableRestorer::new(self.partitions.clone(), self.config.tmp_dir.clone());
        let mut reader = RecoveryReader::new(restorer);
        let report = reader.scan(&self.config.backup_path()).await?;
        if !report.contains(&RecordType::Partition) {
            return Err(Error::NotFound("no valid partition table backup".into()));
        }
        reader.restore_many(&RecordType::Partition, drives).await
    }

    async fn conclude_recovery(
        &mut self,
        kind: CorruptionKind,
        drives: &[String],
        result: Result<()>,
        corruption: Error,
    ) -> Result<()> {
        let serial = self.device_set.serial().to_string();
        match result {
            Ok(()) => {
                info!("Recovered {} on {}", kind, drives.join(","));
                self.emit(LifecycleEvent::recovery_completed(serial, kind, drives.to_vec()))
                    .await;
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.emit(LifecycleEvent::recovery_failed(
                    serial,
                    kind,
                    drives.to_vec(),
                    reason.clone(),
                ))
                .await;
                Err(Error::Recovery {
                    kind: kind.to_string(),
                    reason,
                    corruption: Box::new(corruption),
                })
            }
        }
    }

    /// Tear down and rebuild the metadata mount so repaired drives rejoin
    /// their arrays.
    pub(super) async fn redo_mount(&self) -> Result<()> {
        info!("Remounting metadata");
        let meta_mount = self.config.metadata_mount.display().to_string();
        if let Err(e) = self.filesystem.unmount(&meta_mount).await {
            debug!("Unmount before remount: {}", e);
        }
        for raid in [&self.config.metadata_raid_device, &self.config.data_raid_device] {
            if let Err(e) = self.raid.stop(raid).await {
                debug!("Stop before remount: {}", e);
            }
        }
        self.raid.assemble().await?;
        self.filesystem
            .mount(&self.config.metadata_raid_device, &self.config.metadata_mount)
            .await
    }
}
