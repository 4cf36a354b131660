//! Error types for a3s-backbone

use thiserror::Error;

/// Failure code for an unknown, expired or revoked session
pub const CODE_SESSION_INVALID: u16 = 403;

/// Failure code for a missing record, an unresolvable path or an unknown operation
pub const CODE_NOT_FOUND: u16 = 404;

/// Failure code for everything else
pub const CODE_UNEXPECTED: u16 = 500;

/// Errors that can occur while brokering a request
#[derive(Debug, Error)]
pub enum BackboneError {
    /// Session token absent, unknown, expired, revoked, or the lookup itself failed
    #[error("Session invalid")]
    SessionInvalid,

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// File path rejected by the path restriction policy or containment check
    ///
    /// The attempted path is logged server side and never carried here.
    #[error("Illegal path for original file {file_id}")]
    IllegalPath { file_id: i64 },

    /// Operation name is not in the operation table
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Payload key missing or of the wrong type
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Data-access layer failure
    #[error("Store error: {0}")]
    Store(String),

    /// Permission denied at the storage layer
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Worker pool failure (closed pool, aborted or panicked unit of work)
    #[error("Worker error: {0}")]
    Worker(String),

    /// Path rule set name not present in the rule catalog
    #[error("Unknown path rule set: {0}")]
    UnknownRuleSet(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event-bus connection failure
    #[error("Connection error: {0}")]
    Connection(String),
}

impl BackboneError {
    /// Failure code surfaced to the gateway for this error
    pub fn code(&self) -> u16 {
        match self {
            Self::SessionInvalid => CODE_SESSION_INVALID,
            Self::NotFound(_) | Self::IllegalPath { .. } | Self::UnsupportedOperation(_) => {
                CODE_NOT_FOUND
            }
            _ => CODE_UNEXPECTED,
        }
    }
}

/// Result type alias for backbone operations
pub type Result<T> = std::result::Result<T, BackboneError>;
