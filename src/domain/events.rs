//! Lifecycle Events
//!
//! Immutable records of what happened to a Bryck: completed lifecycle
//! operations, detected corruption and the outcome of self-healing.
//!
//! # Example
//!
//! ```ignore
//! let event = LifecycleEvent::corruption_detected(
//!     "BRK-0001",
//!     CorruptionKind::EncryptionHeader,
//!     vec!["/dev/nvme1n1".to_string()],
//! );
//!
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which recoverable artifact was found damaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorruptionKind {
    /// LUKS header could not be opened
    EncryptionHeader,
    /// Expected partitions missing on an unlocked drive
    PartitionTable,
}

impl std::fmt::Display for CorruptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorruptionKind::EncryptionHeader => write!(f, "encryption header"),
            CorruptionKind::PartitionTable => write!(f, "partition table"),
        }
    }
}

/// Lifecycle event representing a significant occurrence on a Bryck.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LifecycleEvent {
    // =========================================================================
    // Operation Events
    // =========================================================================
    /// A Bryck was formatted and ejected.
    FormatCompleted {
        serial: String,
        drive_count: usize,
        encrypted: bool,
        data_raid_level: u8,
        timestamp: DateTime<Utc>,
    },

    /// The data filesystem was mounted.
    Mounted {
        serial: String,
        mount_dir: String,
        timestamp: DateTime<Utc>,
    },

    /// The Bryck was unmounted, RAID stopped and drives locked.
    Ejected {
        serial: String,
        timestamp: DateTime<Utc>,
    },

    /// All drives were securely erased.
    Erased {
        serial: String,
        timestamp: DateTime<Utc>,
    },

    /// The encryption key was changed on every drive.
    KeyChanged {
        serial: String,
        timestamp: DateTime<Utc>,
    },

    /// A lifecycle operation failed.
    OperationFailed {
        serial: String,
        operation: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Recovery Events
    // =========================================================================
    /// Damaged artifacts were found while mounting.
    CorruptionDetected {
        serial: String,
        kind: CorruptionKind,
        drives: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Damaged artifacts were restored from the backup snapshot.
    RecoveryCompleted {
        serial: String,
        kind: CorruptionKind,
        drives: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Restoring from the backup snapshot failed.
    RecoveryFailed {
        serial: String,
        kind: CorruptionKind,
        drives: Vec<String>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    /// Get the event timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LifecycleEvent::FormatCompleted { timestamp, .. }
            | LifecycleEvent::Mounted { timestamp, .. }
            | LifecycleEvent::Ejected { timestamp, .. }
            | LifecycleEvent::Erased { timestamp, .. }
            | LifecycleEvent::KeyChanged { timestamp, .. }
            | LifecycleEvent::OperationFailed { timestamp, .. }
            | LifecycleEvent::CorruptionDetected { timestamp, .. }
            | LifecycleEvent::RecoveryCompleted { timestamp, .. }
            | LifecycleEvent::RecoveryFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::FormatCompleted { .. } => "FormatCompleted",
            LifecycleEvent::Mounted { .. } => "Mounted",
            LifecycleEvent::Ejected { .. } => "Ejected",
            LifecycleEvent::Erased { .. } => "Erased",
            LifecycleEvent::KeyChanged { .. } => "KeyChanged",
            LifecycleEvent::OperationFailed { .. } => "OperationFailed",
            LifecycleEvent::CorruptionDetected { .. } => "CorruptionDetected",
            LifecycleEvent::RecoveryCompleted { .. } => "RecoveryCompleted",
            LifecycleEvent::RecoveryFailed { .. } => "RecoveryFailed",
        }
    }

    /// Drives named by a recovery event.
    pub fn drives(&self) -> &[String] {
        match self {
            LifecycleEvent::CorruptionDetected { drives, .. }
            | LifecycleEvent::RecoveryCompleted { drives, .. }
            | LifecycleEvent::RecoveryFailed { drives, .. } => drives,
            _ => &[],
        }
    }

    /// Failed operations and damage, as opposed to progress.
    pub fn is_problem(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::OperationFailed { .. }
                | LifecycleEvent::CorruptionDetected { .. }
                | LifecycleEvent::RecoveryFailed { .. }
        )
    }
}

// =============================================================================
// Event Builders
// =============================================================================

impl LifecycleEvent {
    pub fn format_completed(
        serial: impl Into<String>,
        drive_count: usize,
        encrypted: bool,
        data_raid_level: u8,
    ) -> Self {
        LifecycleEvent::FormatCompleted {
            serial: serial.into(),
            drive_count,
            encrypted,
            data_raid_level,
            timestamp: Utc::now(),
        }
    }

    pub fn mounted(serial: impl Into<String>, mount_dir: impl Into<String>) -> Self {
        LifecycleEvent::Mounted {
            serial: serial.into(),
            mount_dir: mount_dir.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn ejected(serial: impl Into<String>) -> Self {
        LifecycleEvent::Ejected {
            serial: serial.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn erased(serial: impl Into<String>) -> Self {
        LifecycleEvent::Erased {
            serial: serial.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn key_changed(serial: impl Into<String>) -> Self {
        LifecycleEvent::KeyChanged {
            serial: serial.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn operation_failed(
        serial: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        LifecycleEvent::OperationFailed {
            serial: serial.into(),
            operation: operation.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn corruption_detected(
        serial: impl Into<String>,
        kind: CorruptionKind,
        drives: Vec<String>,
    ) -> Self {
        LifecycleEvent::CorruptionDetected {
            serial: serial.into(),
            kind,
            drives,
            timestamp: Utc::now(),
        }
    }

    pub fn recovery_completed(
        serial: impl Into<String>,
        kind: CorruptionKind,
        drives: Vec<String>,
    ) -> Self {
        LifecycleEvent::RecoveryCompleted {
            serial: serial.into(),
            kind,
            drives,
            timestamp: Utc::now(),
        }
    }

    pub fn recovery_failed(
        serial: impl Into<String>,
        kind: CorruptionKind,
        drives: Vec<String>,
        reason: impl Into<String>,
    ) -> Self {
        LifecycleEvent::RecoveryFailed {
            serial: serial.into(),
            kind,
            drives,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}
