//! Hardware Discovery Module
//!
//! Finds the drives that make up a Bryck. NVMe drives are listed with
//! nvme-cli, SATA drives with lsblk; both are filtered against the model
//! allow-list from the configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bryck::adapters::ShellCommandRunner;
//! use bryck::domain::ports::DriveEnumerator;
//! use bryck::hardware::{DriveScanner, ScannerConfig};
//! use bryck::BryckConfig;
//!
//! # async fn example() -> bryck::Result<()> {
//! let config = BryckConfig::default();
//! let scanner = DriveScanner::new(
//!     ScannerConfig::from_config(&config),
//!     Arc::new(ShellCommandRunner::new()),
//! );
//!
//! for drive in scanner.list_drives().await? {
//!     println!("  {} - {} ({})", drive.device_path, drive.model, drive.drive_type);
//! }
//! # Ok(())
//! # }
//! ```

pub mod discovery;

pub use discovery::{
    scanner::{DriveScanner, ScannerConfig},
    DriveInfo, DriveType,
};
