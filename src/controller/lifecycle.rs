//! Format, mount, eject, erase and key change.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use super::state::{
    overlay_from_str, FormatOptions, LifecycleState, MetadataDescriptor, MountOptions,
    METADATA_RAID_LEVEL,
};
use super::BryckController;
use crate::domain::events::LifecycleEvent;
use crate::error::{Error, Result};
use crate::tools::{CryptManager, UnlockOutcome};

/// RAID levels offered for the data array.
const SUPPORTED_RAID_LEVELS: &[u8] = &[0, 5, 6];

impl BryckController {
    // =========================================================================
    // Format
    // =========================================================================

    /// Reset, optionally erase and encrypt, partition, build both RAID
    /// arrays and filesystems, write metadata and eject.
    #[instrument(skip_all, fields(drives = self.device_set.drives.len()))]
    pub async fn format(&mut self, options: FormatOptions) -> Result<String> {
        let result = self.run_format(&options).await;
        self.finish("format", result).await
    }

    async fn run_format(&mut self, options: &FormatOptions) -> Result<String> {
        self.ensure_present()?;
        if self.is_mounted().await {
            return Err(Error::AlreadyInState("mounted".into()));
        }
        if !SUPPORTED_RAID_LEVELS.contains(&options.raid_level) {
            return Err(Error::Config(format!(
                "unsupported RAID level {}",
                options.raid_level
            )));
        }
        let key_file = if options.no_encrypt {
            None
        } else {
            Some(require_file(options.key_file.as_deref(), "key file")?)
        };
        if options.no_auth {
            debug!("Authentication is tied to encryption; --no-auth has no separate effect");
        }

        let drives = self.device_set.drive_paths();

        info!("Resetting the Bryck");
        self.reset_all(&drives).await;

        if !options.no_erase {
            info!("Erasing the Bryck");
            self.erase_drives(&drives)
                .await
                .map_err(|e| e.during("Failed to erase the Bryck"))?;
        }

        let targets = match &key_file {
            Some(key) => {
                info!("Encrypting the Bryck");
                self.encrypt_drives(&drives, key).await?;
                drives.iter().map(|d| CryptManager::mapped_path(d)).collect()
            }
            None => drives.clone(),
        };

        info!("Partitioning the Bryck");
        self.partitions
            .create_layout(&targets, self.config.metadata_part_size_mb)
            .await
            .map_err(|e| e.during("Failed to partition the Bryck"))?;

        let drive_type = self.config.drive_type;
        let meta_parts: Vec<String> = targets
            .iter()
            .map(|t| drive_type.partition_name(t, 1))
            .collect();
        let data_parts: Vec<String> = targets
            .iter()
            .map(|t| drive_type.partition_name(t, 2))
            .collect();

        info!("Creating RAID arrays");
        self.raid
            .create(&self.config.metadata_raid_device, &meta_parts, METADATA_RAID_LEVEL, None)
            .await
            .map_err(|e| e.during("Failed to create the metadata RAID"))?;
        self.raid
            .create(
                &self.config.data_raid_device,
                &data_parts,
                options.raid_level,
                options.raid_chunk_mb,
            )
            .await
            .map_err(|e| e.during("Failed to create the data RAID"))?;

        info!("Creating filesystems");
        let (timeout, interval) = (
            self.config.device_wait_timeout(),
            self.config.device_wait_interval(),
        );
        for raid in [&self.config.metadata_raid_device, &self.config.data_raid_device] {
            self.filesystem
                .create(raid, timeout, interval)
                .await
                .map_err(|e| e.during(format!("Failed to create a filesystem on {raid}")))?;
        }

        self.device_set.encryption = key_file.is_some();
        self.device_set.data_raid_level = Some(options.raid_level);
        self.device_set.metadata_raid_level = METADATA_RAID_LEVEL;
        self.device_set.stamp_format_time();

        info!("Writing Bryck metadata");
        self.write_metadata(&drives, &targets)
            .await
            .map_err(|e| e.during("Failed to write Bryck metadata"))?;

        info!("Ejecting the Bryck");
        self.run_eject().await?;

        self.emit(LifecycleEvent::format_completed(
            self.device_set.serial(),
            drives.len(),
            self.device_set.encryption,
            options.raid_level,
        ))
        .await;
        Ok("Bryck formatted successfully".to_string())
    }

    /// Best-effort teardown of whatever a previous format left behind.
    async fn reset_all(&self, drives: &[String]) {
        let drive_type = self.config.drive_type;
        let mapped: Vec<String> = drives.iter().map(|d| CryptManager::mapped_path(d)).collect();

        for (raid, index) in [
            (&self.config.data_raid_device, 2),
            (&self.config.metadata_raid_device, 1),
        ] {
            for set in [drives, &mapped[..]] {
                let members: Vec<String> = set
                    .iter()
                    .map(|d| drive_type.partition_name(d, index))
                    .collect();
                let out = self.raid.reset(raid, &members).await;
                if !out.success() {
                    debug!("RAID reset of {} skipped: {}", raid, out.stderr.trim());
                }
            }
        }

        for set in [&mapped[..], drives] {
            let out = self.partitions.reset(set).await;
            if !out.success() {
                debug!("Partition reset incomplete: {}", out.stderr.trim());
            }
        }

        let crypt = &self.crypt;
        let report = self.fanout.run_commands(drives, move |d| crypt.reset(d)).await;
        if report.failed() {
            debug!(
                "Encryption reset skipped on {}",
                report.failed_inputs().join(",")
            );
        }
    }

    async fn erase_drives(&self, drives: &[String]) -> Result<()> {
        let eraser = &self.eraser;
        self.fanout
            .run_commands(drives, move |d| eraser.erase(d))
            .await
            .into_result()?;
        Ok(())
    }

    async fn encrypt_drives(&self, drives: &[String], key_file: &Path) -> Result<()> {
        let crypt = &self.crypt;
        self.fanout
            .run_commands(drives, move |d| crypt.setup(d, key_file))
            .await
            .into_result()
            .map_err(|e| e.during("Failed to set up encryption"))?;
        self.fanout
            .run_commands(drives, move |d| crypt.unlock_raw(d, key_file))
            .await
            .into_result()
            .map_err(|e| e.during("Failed to unlock the Bryck"))?;
        Ok(())
    }

    /// Mount the metadata filesystem, write the descriptor and recovery
    /// snapshots, and unmount it again.
    async fn write_metadata(&self, drives: &[String], targets: &[String]) -> Result<()> {
        let meta_mount = self.config.metadata_mount.clone();
        self.filesystem
            .mount(&self.config.metadata_raid_device, &meta_mount)
            .await?;

        let result = self.populate_metadata(drives, targets).await;
        let unmounted = self
            .filesystem
            .unmount(&meta_mount.display().to_string())
            .await;
        result?;
        unmounted
    }

    async fn populate_metadata(&self, drives: &[String], targets: &[String]) -> Result<()> {
        self.write_descriptor().await?;
        self.copy_bsmb_store().await?;
        tokio::fs::create_dir_all(self.config.header_backup_path()).await?;

        // Snapshots are best effort: a Bryck without them still works, it
        // just cannot heal itself.
        if self.device_set.encryption {
            if let Err(e) = self.snapshot_headers(drives).await {
                warn!("Failed to back up encryption headers: {}", e);
            }
        }
        if let Err(e) = self.snapshot_partition_tables(targets).await {
            warn!("Failed to back up partition tables: {}", e);
        }
        Ok(())
    }

    async fn write_descriptor(&self) -> Result<()> {
        let overlay = match &self.config.descriptor_overlay {
            Some(path) if path.exists() => {
                Some(overlay_from_str(&tokio::fs::read_to_string(path).await?)?)
            }
            Some(path) => {
                warn!("Descriptor overlay {} not found", path.display());
                None
            }
            None => None,
        };
        let descriptor =
            MetadataDescriptor::from_device_set(&self.device_set).to_json(overlay.as_ref())?;
        let path = self.config.descriptor_path();
        tokio::fs::write(&path, serde_json::to_string(&descriptor)?).await?;
        debug!("Wrote descriptor {}", path.display());
        Ok(())
    }

    async fn copy_bsmb_store(&self) -> Result<()> {
        let Some(source) = &self.config.bsmb_store else {
            return Ok(());
        };
        if !source.exists() {
            warn!("BSMB store {} not found", source.display());
            return Ok(());
        }
        let store: serde_json::Value =
            serde_json::from_str(&tokio::fs::read_to_string(source).await?)?;
        let path = self.config.bsmb_copy_path();
        tokio::fs::write(&path, serde_json::to_string(&store)?).await?;
        debug!("Copied BSMB store to {}", path.display());
        Ok(())
    }

    /// Refresh the device set from the descriptor on the mounted metadata
    /// filesystem.
    pub(super) async fn reload_descriptor(&mut self) {
        let path = self.config.descriptor_path();
        let parsed = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str::<MetadataDescriptor>(&text).map_err(Error::from),
            Err(e) => Err(Error::from(e)),
        };
        match parsed {
            Ok(descriptor) => self.device_set.apply_descriptor(&descriptor),
            Err(e) => warn!("Unable to read descriptor {}: {}", path.display(), e),
        }
    }

    // =========================================================================
    // Mount
    // =========================================================================

    /// Unlock, assemble and mount, repairing damaged encryption headers
    /// and partition tables from the backup snapshot on the way.
    #[instrument(skip_all, fields(mount_dir = ?options.mount_dir))]
    pub async fn mount(&mut self, options: MountOptions) -> Result<String> {
        let result = self.run_mount(options).await;
        self.finish("mount", result).await
    }

    async fn run_mount(&mut self, options: MountOptions) -> Result<String> {
        self.ensure_present()?;
        if self.is_mounted().await {
            return Err(Error::AlreadyInState("mounted".into()));
        }
        let mount_dir = options
            .mount_dir
            .ok_or_else(|| Error::ConfigurationMissing("mount directory is required".into()))?;
        if !mount_dir.is_dir() {
            return Err(Error::ConfigurationMissing(format!(
                "mount directory {} does not exist",
                mount_dir.display()
            )));
        }
        let key_file = require_file(options.key_file.as_deref(), "key file")?;

        self.state = LifecycleState::Recovering;
        let drives = self.device_set.drive_paths();

        // With no LUKS header on any drive the metadata array could not
        // assemble either, so there is nothing to heal.
        let encrypted = self.crypt.is_enabled(&drives).await;
        let (corrupted, unlock_errors) = if encrypted {
            info!("Unlocking the Bryck");
            self.unlock_drives(&drives, &key_file).await?
        } else {
            debug!("No encrypted drives, skipping unlock");
            (Vec::new(), String::new())
        };

        info!("Reconstructing metadata");
        self.raid
            .assemble()
            .await
            .map_err(|e| e.during("Failed to reconstruct metadata"))?;
        ensure_empty(&self.config.metadata_mount).await?;
        self.filesystem
            .mount(&self.config.metadata_raid_device, &self.config.metadata_mount)
            .await
            .map_err(|e| e.during("Failed to mount metadata"))?;
        self.reload_descriptor().await;

        if !corrupted.is_empty() {
            let corruption = Error::PartialFailure {
                failed: corrupted.clone(),
                stderr: unlock_errors,
            };
            self.recover_encryption_headers(&corrupted, &key_file, corruption)
                .await?;
            self.redo_mount()
                .await
                .map_err(|e| e.during("Failed to remount after header recovery"))?;
        }

        let targets: Vec<String> = if encrypted {
            drives.iter().map(|d| CryptManager::mapped_path(d)).collect()
        } else {
            drives.clone()
        };
        let damaged = self.probe_partitions(&targets).await;
        if !damaged.is_empty() {
            self.recover_partition_tables(&damaged).await?;
            self.redo_mount()
                .await
                .map_err(|e| e.during("Failed to remount after partition recovery"))?;
        }

        ensure_empty(&mount_dir).await?;
        info!("Mounting the Bryck at {}", mount_dir.display());
        self.filesystem
            .mount(&self.config.data_raid_device, &mount_dir)
            .await
            .map_err(|e| e.during("Failed to mount the Bryck"))?;

        self.state = LifecycleState::Mounted;
        self.emit(LifecycleEvent::mounted(
            self.device_set.serial(),
            mount_dir.display().to_string(),
        ))
        .await;
        Ok(format!("Bryck mounted at {}", mount_dir.display()))
    }

    /// Open every drive that is not already open. A rejected key aborts;
    /// any other failure marks the drive as having a damaged header.
    async fn unlock_drives(
        &self,
        drives: &[String],
        key_file: &Path,
    ) -> Result<(Vec<String>, String)> {
        let open = self.open_mappings().await;
        let pending: Vec<String> = drives
            .iter()
            .filter(|d| !open.contains(d))
            .cloned()
            .collect();

        let crypt = &self.crypt;
        let outcomes = self
            .fanout
            .run(&pending, move |d| crypt.unlock(d, key_file))
            .await;

        let mut corrupted = Vec::new();
        let mut errors = String::new();
        for (drive, outcome) in pending.iter().zip(outcomes) {
            match outcome {
                UnlockOutcome::Unlocked => debug!("Unlocked {}", drive),
                UnlockOutcome::BadCredential(stderr) => {
                    return Err(Error::Authentication(format!(
                        "wrong key provided for {drive}: {}",
                        stderr.trim()
                    )));
                }
                UnlockOutcome::Failed(stderr) => {
                    warn!("Unable to unlock {}: {}", drive, stderr.trim());
                    errors.push_str(stderr.trim());
                    errors.push('\n');
                    corrupted.push(drive.clone());
                }
            }
        }
        Ok((corrupted, errors.trim_end().to_string()))
    }

    /// Drives missing either Bryck partition.
    async fn probe_partitions(&self, targets: &[String]) -> Vec<String> {
        let drive_type = self.config.drive_type;
        let partitions = &self.partitions;
        let present = self
            .fanout
            .run(targets, move |t| async move {
                partitions
                    .has_partitions(
                        &drive_type.partition_name(t, 1),
                        &drive_type.partition_name(t, 2),
                    )
                    .await
            })
            .await;
        targets
            .iter()
            .zip(present)
            .filter(|(_, ok)| !ok)
            .map(|(t, _)| t.clone())
            .collect()
    }

    // =========================================================================
    // Eject
    // =========================================================================

    /// Unmount, flush, stop both arrays and lock every drive.
    #[instrument(skip_all)]
    pub async fn eject(&mut self) -> Result<String> {
        let result = self.run_eject().await;
        self.finish("eject", result).await
    }

    async fn run_eject(&mut self) -> Result<String> {
        self.ensure_present()?;
        if self.is_ejected().await {
            return Err(Error::AlreadyInState("ejected".into()));
        }
        self.teardown().await?;

        self.state = LifecycleState::Ejected;
        self.emit(LifecycleEvent::ejected(self.device_set.serial()))
            .await;
        Ok("Bryck ejected successfully".to_string())
    }

    /// Unmount, flush, stop both arrays and lock every open mapping.
    async fn teardown(&self) -> Result<()> {
        if self.is_mounted().await {
            info!("Unmounting the Bryck");
            if self.raid_mounted(&self.config.metadata_raid_device).await {
                self.filesystem
                    .unmount(&self.config.metadata_mount.display().to_string())
                    .await
                    .map_err(|e| e.during("Failed to unmount metadata"))?;
            }
            self.filesystem
                .flush()
                .await
                .map_err(|e| e.during("Failed to flush the Bryck"))?;
            if self.raid_mounted(&self.config.data_raid_device).await {
                self.filesystem
                    .unmount(&self.config.data_raid_device)
                    .await
                    .map_err(|e| e.during("Failed to unmount the Bryck"))?;
            }
        }

        info!("Stopping RAID arrays");
        self.raid
            .stop(&self.config.data_raid_device)
            .await
            .map_err(|e| e.during("Failed to stop the data RAID"))?;
        self.raid
            .stop(&self.config.metadata_raid_device)
            .await
            .map_err(|e| e.during("Failed to stop the metadata RAID"))?;

        info!("Locking the Bryck");
        let open = self.open_mappings().await;
        let crypt = &self.crypt;
        self.fanout
            .run_commands(&open, move |d| crypt.lock(d))
            .await
            .into_result()
            .map_err(|e| e.during("Failed to lock the Bryck"))?;
        Ok(())
    }

    async fn raid_mounted(&self, raid: &str) -> bool {
        match self.raid.device(raid).await {
            Some(device) => self.filesystem.is_mounted(&device).await,
            None => false,
        }
    }

    // =========================================================================
    // Erase
    // =========================================================================

    /// Eject if needed, then securely erase every drive.
    #[instrument(skip_all)]
    pub async fn erase(&mut self) -> Result<String> {
        let result = self.run_erase().await;
        self.finish("erase", result).await
    }

    async fn run_erase(&mut self) -> Result<String> {
        self.ensure_present()?;
        if self.is_mounted().await {
            return Err(Error::AlreadyInState("mounted; eject it before erasing".into()));
        }
        if let Err(e) = self.run_eject().await {
            debug!("Eject before erase: {}", e);
        }

        info!("Erasing the Bryck");
        let drives = self.device_set.drive_paths();
        self.erase_drives(&drives)
            .await
            .map_err(|e| e.during("Secure erase failed"))?;

        self.state = LifecycleState::Ejected;
        self.emit(LifecycleEvent::erased(self.device_set.serial()))
            .await;
        Ok("Bryck erased successfully".to_string())
    }

    // =========================================================================
    // Key Change
    // =========================================================================

    /// Replace the encryption key on every drive.
    #[instrument(skip_all)]
    pub async fn set_key(
        &mut self,
        old_key: Option<PathBuf>,
        new_key: Option<PathBuf>,
    ) -> Result<String> {
        let result = self
            .run_set_key(old_key.as_deref(), new_key.as_deref())
            .await;
        self.finish("setkey", result).await
    }

    async fn run_set_key(
        &mut self,
        old_key: Option<&Path>,
        new_key: Option<&Path>,
    ) -> Result<String> {
        self.ensure_present()?;
        let drives = self.device_set.drive_paths();
        if !self.crypt.is_enabled(&drives).await {
            return Err(Error::NotFound(
                "encryption is not enabled on the Bryck".into(),
            ));
        }
        let old_key = require_file(old_key, "old key file")?;
        let new_key = require_file(new_key, "new key file")?;

        info!("Changing the Bryck key");
        let crypt = &self.crypt;
        let (old, new) = (old_key.as_path(), new_key.as_path());
        self.fanout
            .run_commands(&drives, move |d| crypt.change_key(d, old, new))
            .await
            .into_result()
            .map_err(|e| e.during("Failed to change the Bryck key"))?;

        if let Err(e) = self.refresh_header_snapshots(&drives, new).await {
            warn!("Header backups still hold the old key: {}", e);
        }

        self.emit(LifecycleEvent::key_changed(self.device_set.serial()))
            .await;
        Ok("Bryck key changed successfully".to_string())
    }

    /// Retake the header snapshot so a restored header opens with the new
    /// key. An ejected Bryck is opened just far enough to reach the
    /// metadata filesystem and closed again.
    async fn refresh_header_snapshots(&self, drives: &[String], key_file: &Path) -> Result<()> {
        if self.raid_mounted(&self.config.metadata_raid_device).await {
            self.snapshot_headers(drives).await?;
            return Ok(());
        }
        if !self.is_ejected().await {
            return Err(Error::AlreadyInState(
                "assembled without the metadata filesystem mounted".into(),
            ));
        }

        info!("Refreshing encryption header backups");
        let snapshot = match self.open_metadata(drives, key_file).await {
            Ok(()) => self.snapshot_headers(drives).await.map(|_| ()),
            Err(e) => Err(e),
        };
        let closed = self.teardown().await;
        snapshot?;
        closed
    }

    /// Unlock, assemble and mount only the metadata filesystem.
    async fn open_metadata(&self, drives: &[String], key_file: &Path) -> Result<()> {
        let crypt = &self.crypt;
        self.fanout
            .run_commands(drives, move |d| crypt.unlock_raw(d, key_file))
            .await
            .into_result()
            .map_err(|e| e.during("Failed to unlock with the new key"))?;
        self.raid.assemble().await?;
        ensure_empty(&self.config.metadata_mount).await?;
        self.filesystem
            .mount(&self.config.metadata_raid_device, &self.config.metadata_mount)
            .await
    }
}

/// A key file must be given and must exist.
fn require_file(path: Option<&Path>, what: &str) -> Result<PathBuf> {
    let path = path.ok_or_else(|| Error::ConfigurationMissing(format!("{what} is required")))?;
    if !path.is_file() {
        return Err(Error::ConfigurationMissing(format!(
            "{what} {} does not exist",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

/// A mount target that already has content means a stale mount.
async fn ensure_empty(path: &Path) -> Result<()> {
    let mut listing = match tokio::fs::read_dir(path).await {
        Ok(listing) => listing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if listing.next_entry().await?.is_some() {
        return Err(Error::AlreadyInState(format!(
            "mounted: {} is not empty",
            path.display()
        )));
    }
    Ok(())
}
