//! Infrastructure Adapters
//!
//! Adapter implementations for the domain ports, following the
//! Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  CommandRunner │ DriveEnumerator │ EventPublisher          │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ ShellCommandRunner │ LoggingEventPublisher                  │ │
//! │  │ ScriptedCommandRunner │ FixedDriveEnumerator (mock)        │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use bryck::adapters::ShellCommandRunner;
//! use bryck::domain::ports::CommandRunner;
//!
//! let runner = ShellCommandRunner::with_sudo();
//! let out = runner.execute("mdadm --assemble --scan").await;
//! ```

mod event_publisher;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod shell;

pub use event_publisher::{InMemoryEventCollector, LoggingEventPublisher};
#[cfg(any(test, feature = "mock"))]
pub use mock::{FixedDriveEnumerator, ScriptedCommandRunner};
pub use shell::{ShellCommandRunner, SPAWN_FAILURE_EXIT_CODE};
