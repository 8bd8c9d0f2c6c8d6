//! Error types for ZQLZ sync

use thiserror::Error;
use uuid::Uuid;

/// Core error type for ZQLZ sync operations
#[derive(Error, Debug)]
pub enum ZqlzError {
    /// A connection string could not be parsed. Edits carrying such a value
    /// must be rejected before they reach the store.
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// An update or delete referenced a record the local store does not hold
    #[error("Record not found: {0}")]
    RecordNotFound(Uuid),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ZqlzError {
    /// Whether the error came from talking to the remote store
    pub fn is_transport(&self) -> bool {
        matches!(self, ZqlzError::Transport(_) | ZqlzError::NotAuthenticated)
    }
}

/// Result type alias for ZQLZ operations
pub type Result<T> = std::result::Result<T, ZqlzError>;
