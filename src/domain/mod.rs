//! Domain Layer
//!
//! Ports (traits the controller depends on) and lifecycle events.
//!
//! # Usage
//!
//! ```ignore
//! use bryck::domain::ports::{CommandRunner, DriveEnumerator};
//! use bryck::domain::events::LifecycleEvent;
//!
//! async fn unmount<R: CommandRunner>(runner: &R, path: &str) -> bool {
//!     runner.execute(&format!("umount {path}")).await.success()
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::{CorruptionKind, LifecycleEvent};
pub use ports::{ArtifactRestorer, CommandOutput, CommandRunner, DriveEnumerator, EventPublisher};
