//! Error types for the Bryck lifecycle manager

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing a Bryck
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// No matching device, record or key
    #[error("Not found: {0}")]
    NotFound(String),

    /// The device set is already in the state the operation would produce
    #[error("Bryck is already {0}")]
    AlreadyInState(String),

    /// A required key file, mount directory or similar input is absent
    #[error("Missing configuration: {0}")]
    ConfigurationMissing(String),

    /// The key file was rejected by the encryption layer
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A lifecycle step failed; `message` says which one
    #[error("{message}: {source}")]
    Phase {
        message: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // External Command Errors
    // =========================================================================
    /// An external command exited non-zero
    #[error("Command '{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// A fan-out batch finished with at least one failing input
    #[error("Operation failed on {}: {stderr}", failed.join(","))]
    PartialFailure { failed: Vec<String>, stderr: String },

    // =========================================================================
    // Recovery Errors
    // =========================================================================
    /// A persisted record failed to decode or its checksum did not match
    #[error("Record {} is corrupt: {reason}", path.display())]
    ValidationFailed { path: PathBuf, reason: String },

    /// Corruption was detected and the restore from backup failed
    #[error("Recovery of {kind} failed ({reason}); original error: {corruption}")]
    Recovery {
        kind: String,
        reason: String,
        corruption: Box<Error>,
    },

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap this error with the lifecycle step that produced it.
    pub fn during(self, message: impl Into<String>) -> Self {
        Error::Phase {
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// Process exit status reported by the CLI for this error.
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// The innermost error, looking through `Phase` wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Phase { source, .. } => source.root(),
            other => other,
        }
    }
}
