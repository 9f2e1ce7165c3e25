//! Error types for modulesmgrd.
//!
//! Every fault the engine can hit is localized to a single port: handlers
//! return these errors and the driver loop turns them into a terminal
//! `ERROR` transition for that port only.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for modulesmgrd operations.
pub type Result<T> = std::result::Result<T, ModulesMgmtError>;

/// Errors that can occur while bringing up transceiver modules.
#[derive(Debug, Error)]
pub enum ModulesMgmtError {
    /// Reading or writing a hardware attribute file failed.
    #[error("Attribute I/O failed on {}: {source}", path.display())]
    AttributeIo {
        /// Attribute file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// An attribute file held something that is not an integer.
    #[error("Invalid attribute value {value:?} in {}", path.display())]
    AttributeParse {
        /// Attribute file path.
        path: PathBuf,
        /// Raw content that failed to parse.
        value: String,
    },

    /// A module EEPROM field could not be read.
    #[error("EEPROM read of {field} failed for port {port}")]
    Eeprom {
        /// Port index.
        port: usize,
        /// Logical field name.
        field: &'static str,
    },

    /// poll(2) on the attribute handles failed.
    #[error("Poll failed: {0}")]
    Poll(#[from] nix::Error),

    /// Persistent table operation failed.
    #[error("Database operation failed: {operation}: {message}")]
    Database {
        /// The operation that failed (e.g., "hset", "del").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Result channel is full; the change-set stays pending.
    #[error("Result channel full after {timeout_ms}ms")]
    ChannelFull {
        /// Enqueue timeout that elapsed.
        timeout_ms: u64,
    },

    /// Result channel receiver is gone.
    #[error("Result channel closed")]
    ChannelClosed,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error outside of attribute access.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ModulesMgmtError {
    /// Creates an attribute I/O error.
    pub fn attribute_io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::AttributeIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Creates an attribute parse error.
    pub fn attribute_parse(path: impl AsRef<Path>, value: impl Into<String>) -> Self {
        Self::AttributeParse {
            path: path.as_ref().to_path_buf(),
            value: value.into(),
        }
    }

    /// Creates a database error.
    pub fn database(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Returns true if the attribute file simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ModulesMgmtError::AttributeIo { source, .. } if source.kind() == io::ErrorKind::NotFound
        )
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModulesMgmtError::AttributeIo { .. }
                | ModulesMgmtError::Database { .. }
                | ModulesMgmtError::ChannelFull { .. }
        )
    }
}
