//! Device Lifecycle Orchestrator
//!
//! `BryckController` owns one discovered device set and drives it through
//! format, mount, eject, erase and key change. Every host action goes
//! through the tool managers, which go through the `CommandRunner` port.
//!
//! # State Machine
//!
//! ```text
//!                 format
//!   Ejected ──────────────────► Ejected
//!      │ mount                     ▲
//!      ▼                           │ eject
//!   Recovering ──► Mounted ────────┘
//!      │
//!      └─(restore failed)──► Error
//! ```
//!
//! `probe_state` derives the state from the host; operations record the
//! state they leave the device set in.

mod lifecycle;
mod recovery;
pub mod state;

pub use state::{
    BryckInfo, DeviceList, DeviceListEntry, DeviceSet, FormatOptions, LifecycleState,
    MetadataDescriptor, MountOptions,
};

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::BryckConfig;
use crate::domain::events::LifecycleEvent;
use crate::domain::ports::{CommandRunner, DriveEnumerator, EventPublisher};
use crate::error::{Error, Result};
use crate::fanout::FanOut;
use crate::tools::{
    CryptManager, EraseManager, FilesystemManager, PartitionManager, RaidManager, Shell,
};

/// Orchestrates the lifecycle of one Bryck.
pub struct BryckController {
    config: BryckConfig,
    device_set: DeviceSet,
    state: LifecycleState,

    shell: Shell,
    raid: RaidManager,
    crypt: CryptManager,
    partitions: PartitionManager,
    filesystem: FilesystemManager,
    eraser: EraseManager,
    fanout: FanOut,

    events: Arc<dyn EventPublisher>,
}

impl BryckController {
    /// Discover the Bryck drives and build a controller for them.
    ///
    /// Finding no drives is not an error here; every operation except
    /// `status` reports it instead.
    pub async fn discover(
        config: BryckConfig,
        runner: Arc<dyn CommandRunner>,
        enumerator: &dyn DriveEnumerator,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        config.validate()?;
        let drives = enumerator.list_drives().await?;
        info!(
            drive_count = drives.len(),
            drive_type = %config.drive_type,
            "Discovered Bryck drives"
        );

        let shell = Shell::new(runner);
        let device_set = DeviceSet::from_drives(config.drive_type, drives);
        let state = if device_set.is_empty() {
            LifecycleState::NotFound
        } else {
            LifecycleState::Ejected
        };

        Ok(Self {
            raid: RaidManager::new(shell.clone()),
            crypt: CryptManager::new(shell.clone()),
            partitions: PartitionManager::new(shell.clone()),
            filesystem: FilesystemManager::new(shell.clone()),
            eraser: EraseManager::new(shell.clone(), config.drive_type),
            fanout: FanOut::from_config(&config),
            shell,
            config,
            device_set,
            state,
            events,
        })
    }

    pub fn config(&self) -> &BryckConfig {
        &self.config
    }

    pub fn device_set(&self) -> &DeviceSet {
        &self.device_set
    }

    /// State recorded by the last operation or probe.
    pub fn status(&self) -> LifecycleState {
        self.state
    }

    // =========================================================================
    // Host Probes
    // =========================================================================

    /// True when either Bryck filesystem is mounted.
    pub async fn is_mounted(&self) -> bool {
        for raid in [&self.config.data_raid_device, &self.config.metadata_raid_device] {
            if let Some(device) = self.raid.device(raid).await {
                if self.filesystem.is_mounted(&device).await {
                    return true;
                }
            }
        }
        false
    }

    /// True when nothing is mounted, no RAID device exists and no drive has
    /// an open encryption mapping.
    pub async fn is_ejected(&self) -> bool {
        if self.is_mounted().await {
            return false;
        }
        for raid in [&self.config.data_raid_device, &self.config.metadata_raid_device] {
            if self.raid.device(raid).await.is_some() {
                return false;
            }
        }
        self.open_mappings().await.is_empty()
    }

    /// Derive the lifecycle state from the host and record it.
    pub async fn probe_state(&mut self) -> LifecycleState {
        let state = if self.device_set.is_empty() {
            LifecycleState::NotFound
        } else if self.is_mounted().await {
            LifecycleState::Mounted
        } else if self.is_ejected().await {
            LifecycleState::Ejected
        } else {
            LifecycleState::Assembled
        };
        debug!(state = %state, "Probed Bryck state");
        self.state = state;
        state
    }

    /// Raw drives whose encryption mapping is currently open.
    async fn open_mappings(&self) -> Vec<String> {
        let mut open = Vec::new();
        for drive in self.device_set.drive_paths() {
            let mapped = CryptManager::mapped_path(&drive);
            if self.shell.run(&format!("test -e {mapped}")).await.success() {
                open.push(drive);
            }
        }
        open
    }

    // =========================================================================
    // Read-only Projections
    // =========================================================================

    /// Product, capacity and RAID information, plus filesystem usage when
    /// mounted.
    pub async fn info(&mut self) -> Result<BryckInfo> {
        self.ensure_present()?;
        let state = self.probe_state().await;
        self.device_set.encryption = self.crypt.is_enabled(&self.device_set.drive_paths()).await;
        if self.device_set.data_raid_level.is_none() {
            self.device_set.data_raid_level = self.read_data_raid_level().await;
        }

        let usage = if state == LifecycleState::Mounted {
            let usage = self.filesystem.usage(&self.config.data_raid_device).await;
            if usage.is_none() {
                warn!("Unable to read filesystem usage");
            }
            usage
        } else {
            None
        };

        let set = &self.device_set;
        Ok(BryckInfo {
            product_name: self.config.product_name.clone(),
            serial_number: set.serial().to_string(),
            firmware_rev: set.firmware_rev.clone(),
            capacity: set.raw_capacity,
            device_path: self.config.data_raid_device.clone(),
            encryption: set.encryption,
            data_raid_level: set.data_raid_level,
            metadata_raid_level: set.metadata_raid_level,
            drive_count: set.drives.len(),
            state,
            usage,
        })
    }

    /// Level of the data array as the host sees it: the running array when
    /// there is one, otherwise the md superblock on a data partition. An
    /// encrypted set hides its superblocks until it is unlocked.
    async fn read_data_raid_level(&self) -> Option<u8> {
        if self.raid.device(&self.config.data_raid_device).await.is_some() {
            return self.raid.level(&self.config.data_raid_device).await;
        }

        let open = self.open_mappings().await;
        let targets: Vec<String> = if open.is_empty() {
            self.device_set.drive_paths()
        } else {
            open.iter().map(|d| CryptManager::mapped_path(d)).collect()
        };
        let drive_type = self.device_set.drive_type;
        for target in &targets {
            let member = drive_type.partition_name(target, 2);
            if let Some(level) = self.raid.examine_level(&member).await {
                debug!(member = %member, raid_level = level, "Read data RAID level from superblock");
                return Some(level);
            }
        }
        None
    }

    /// One entry per discovered drive.
    pub fn list(&self) -> Result<DeviceList> {
        self.ensure_present()?;
        Ok(DeviceList {
            device_list: self
                .device_set
                .drives
                .iter()
                .map(DeviceListEntry::from)
                .collect(),
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn ensure_present(&self) -> Result<()> {
        if self.device_set.is_empty() {
            return Err(Error::NotFound("Bryck not found".into()));
        }
        Ok(())
    }

    /// Publish an event; a failing publisher never fails the operation.
    async fn emit(&self, event: LifecycleEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!("Failed to publish lifecycle event: {}", e);
        }
    }

    /// Record the outcome of an operation, publishing `OperationFailed` on
    /// error.
    async fn finish<T>(&mut self, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!(operation = %operation, error = %e, "Bryck operation failed");
            self.state = LifecycleState::Error;
            let event =
                LifecycleEvent::operation_failed(self.device_set.serial(), operation, e.to_string());
            self.emit(event).await;
        }
        result
    }
}

impl std::fmt::Debug for BryckController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BryckController")
            .field("state", &self.state)
            .field("drives", &self.device_set.drives.len())
            .field("max_workers", &self.fanout.max_workers())
            .finish_non_exhaustive()
    }
}
