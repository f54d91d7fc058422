//! Error types for Elevator
//!
//! Provides a unified error type for all operations. Every variant maps onto
//! a wire-level [`ErrorKind`] so the dispatcher can turn any failure into an
//! error response instead of tearing down the connection.

use thiserror::Error;

use crate::protocol::ErrorKind;

/// Result type alias using ElevatorError
pub type Result<T> = std::result::Result<T, ElevatorError>;

/// Unified error type for Elevator operations
#[derive(Debug, Error)]
pub enum ElevatorError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Unknown opcode: 0x{0:02x}")]
    UnknownOpcode(u8),

    /// Transport-level framing violation (bad frame count, oversized frame)
    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Registry Errors
    // -------------------------------------------------------------------------
    #[error("Database '{0}' not found")]
    DatabaseNotFound(String),

    #[error("Database '{0}' already exists")]
    DatabaseExists(String),

    #[error("Invalid database name: {0}")]
    InvalidDatabaseName(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Database '{0}' already mounted")]
    AlreadyMounted(String),

    #[error("Database '{0}' already unmounted")]
    AlreadyUnmounted(String),

    #[error("Database '{0}' is mounted and cannot be dropped")]
    DatabaseMounted(String),

    #[error("Database '{0}' is not mounted")]
    DatabaseUnmounted(String),

    #[error("Database '{0}' is being unmounted")]
    Unmounting(String),

    // -------------------------------------------------------------------------
    // Catalogue Errors
    // -------------------------------------------------------------------------
    #[error("Catalogue corrupt: {0}")]
    CatalogueCorrupt(String),

    #[error("Catalogue persistence failed: {0}")]
    CataloguePersist(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    #[error("Key not found")]
    KeyNotFound,

    #[error("Result too large: more than {0} bytes")]
    ResultTooLarge(usize),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    /// Error response returned by a server
    #[error("Server error ({kind:?}): {message}")]
    Remote { kind: ErrorKind, message: String },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ElevatorError {
    /// Get the error kind reported on the wire
    pub fn kind(&self) -> ErrorKind {
        match self {
            ElevatorError::MalformedRequest(_) | ElevatorError::Protocol(_) => {
                ErrorKind::MalformedRequest
            }
            ElevatorError::UnknownOpcode(_) => ErrorKind::UnknownOpcode,
            ElevatorError::DatabaseNotFound(_) => ErrorKind::DatabaseNotFound,
            ElevatorError::DatabaseExists(_) => ErrorKind::DatabaseExists,
            ElevatorError::InvalidDatabaseName(_) => ErrorKind::InvalidDatabaseName,
            ElevatorError::AlreadyMounted(_) => ErrorKind::AlreadyMounted,
            ElevatorError::AlreadyUnmounted(_) => ErrorKind::AlreadyUnmounted,
            ElevatorError::DatabaseUnmounted(_) | ElevatorError::Unmounting(_) => {
                ErrorKind::DatabaseUnmounted
            }
            ElevatorError::DatabaseMounted(_) => ErrorKind::DatabaseMounted,
            ElevatorError::KeyNotFound => ErrorKind::KeyNotFound,
            ElevatorError::Storage(_)
            | ElevatorError::Io(_)
            | ElevatorError::ResultTooLarge(_) => ErrorKind::Storage,
            ElevatorError::CatalogueCorrupt(_) | ElevatorError::CataloguePersist(_) => {
                ErrorKind::Catalogue
            }
            ElevatorError::Remote { kind, .. } => *kind,
            ElevatorError::Network(_) | ElevatorError::Config(_) => ErrorKind::Internal,
        }
    }
}
