//! Common error types for the router redundancy components.

use std::fmt;
use std::path::PathBuf;

/// A specialized Result type for redundancy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for redundancy operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command error: {0}")]
    Command(String),

    #[error("Timed out acquiring lock {} after {attempts} attempts", path.display())]
    LockTimeout { path: PathBuf, attempts: u32 },

    #[error("Template error: {0}")]
    Template(String),

    #[error("Inventory error: {0}")]
    Inventory(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new command error.
    pub fn command(msg: impl fmt::Display) -> Self {
        Error::Command(msg.to_string())
    }

    /// Create a new template error.
    pub fn template(msg: impl fmt::Display) -> Self {
        Error::Template(msg.to_string())
    }

    /// Create a new inventory error.
    pub fn inventory(msg: impl fmt::Display) -> Self {
        Error::Inventory(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }

    /// Whether this error came from failing to take the transition lock.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }
}
