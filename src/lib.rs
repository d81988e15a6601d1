//! Bryck - Removable Multi-Drive Storage Lifecycle Manager
//!
//! A Bryck is a removable enclosure of identical NVMe or SATA drives that
//! is formatted as one encrypted, RAID-protected filesystem, carried
//! between hosts, and mounted again on arrival.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       BryckController                            │
//! │       format │ mount │ eject │ erase │ setkey │ info │ list      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Tools     │    │   FanOut     │    │   Recovery   │       │
//! │  │ raid, crypt, │    │ (per-drive   │    │ (records +   │       │
//! │  │ part, fs ... │    │  parallel)   │    │  restorers)  │       │
//! │  └──────┬───────┘    └──────────────┘    └──────────────┘       │
//! │         ▼                                                        │
//! │   CommandRunner port  ──►  ShellCommandRunner / test doubles     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Implementations of the domain ports
//! - [`config`] - Static host configuration
//! - [`controller`] - Lifecycle orchestration and self-healing mount
//! - [`domain`] - Ports and lifecycle events
//! - [`error`] - Error types
//! - [`fanout`] - Bounded parallel execution over drives
//! - [`hardware`] - Drive discovery
//! - [`recovery`] - Checksummed recovery records and restore
//! - [`tools`] - RAID, encryption, partition, filesystem and erase commands

pub mod adapters;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod fanout;
pub mod hardware;
pub mod recovery;
pub mod tools;

// Re-export commonly used types
pub use config::BryckConfig;
pub use controller::{BryckController, FormatOptions, LifecycleState, MountOptions};
pub use error::{Error, Result};
pub use fanout::FanOut;
pub use hardware::{DriveInfo, DriveScanner, DriveType};
pub use recovery::{RecordStore, RecordType, RecoveryReader};
