//! Error types for adapters, stores, and the registry.

use printfleet_core::MachineId;
use thiserror::Error;

/// Failure reported by a vendor adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The adapter does not implement the operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    /// The machine could not be reached or dropped the connection.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The machine answered with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The machine configuration is invalid for this adapter.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// The requested file does not exist on the machine.
    #[error("file not found: {0}")]
    FileNotFound(String),
    /// I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unsupported(_) => "unsupported",
            Self::Connection(_) => "connection",
            Self::Protocol(_) => "protocol",
            Self::Configuration(_) => "configuration",
            Self::FileNotFound(_) => "file_not_found",
            Self::Io(_) => "io",
        }
    }
}

/// Failure of a configuration or file store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to read or write the backing file.
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The backing file is not valid JSON.
    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Stored content does not match the handle's hash.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Hash named by the handle.
        expected: String,
        /// Hash of the supplied content.
        actual: String,
    },
    /// Storing the file would exceed the store's size limit.
    #[error("store full: {needed} bytes needed, {available} available")]
    Full {
        /// Size of the rejected file.
        needed: u64,
        /// Remaining capacity.
        available: u64,
    },
}

/// Failure of a registry operation.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No connector factory handles the discriminator.
    #[error("no connector registered for '{0}'")]
    UnknownDiscriminator(String),
    /// No machine with this ID is registered.
    #[error("Could not find Machine with ID {0}")]
    UnknownMachine(MachineId),
    /// The factory or adapter failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    /// The configuration store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ── Tests ──
