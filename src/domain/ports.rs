//! Domain Ports (Port/Adapter Pattern)
//!
//! The controller only talks to the host through these traits. Adapters
//! provide the real implementations (shell, sysfs) and the test doubles.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │ CommandRunner │ DriveEnumerator │ ArtifactRestorer  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  ShellCommandRunner │ DriveScanner │ LuksRestorer   │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;

use super::events::LifecycleEvent;
use crate::error::{Error, Result};
use crate::hardware::DriveInfo;
use crate::recovery::{Artifact, RecordType};

// =============================================================================
// Value Objects
// =============================================================================

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// A successful, silent command.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A successful command with the given stdout.
    pub fn ok_with(stdout: impl Into<String>) -> Self {
        Self::new(0, stdout, "")
    }

    /// A failed command with the given stderr.
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self::new(1, "", stderr)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into `Error::CommandFailed`.
    pub fn check(self, command: &str) -> Result<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::CommandFailed {
                command: command.to_string(),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

// =============================================================================
// Command Execution Port
// =============================================================================

/// Port for running host commands.
///
/// Every RAID, encryption, partition, filesystem and erase action reduces
/// to this one shape. Implementations never retry and never time out.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Execute a shell command line and capture its status and output.
    async fn execute(&self, command: &str) -> CommandOutput;
}

// =============================================================================
// Drive Enumeration Port
// =============================================================================

/// Port for discovering the drives that make up a Bryck.
///
/// Implementations return the already-filtered drive list (allow-listed
/// models only); the controller does no filtering of its own.
#[async_trait]
pub trait DriveEnumerator: Send + Sync {
    async fn list_drives(&self) -> Result<Vec<DriveInfo>>;
}

// =============================================================================
// Artifact Restore Port
// =============================================================================

/// Capability used by the recovery reader to put one backed-up artifact
/// back onto a drive.
#[async_trait]
pub trait ArtifactRestorer: Send + Sync {
    /// Record type this restorer knows how to apply.
    fn record_type(&self) -> RecordType;

    /// Restore `artifact` onto the drive identified by `drive`.
    async fn restore_one(&self, drive: &str, artifact: &Artifact) -> Result<()>;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing lifecycle events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a lifecycle event.
    async fn publish(&self, event: LifecycleEvent) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================
