//! Steward Error Types

use thiserror::Error;

/// Result type alias for steward operations
pub type Result<T> = std::result::Result<T, Error>;

/// Steward error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Session errors
    #[error("Session error: {0}")]
    Session(String),

    #[error("Session closed")]
    SessionClosed,

    // Membership errors
    #[error("Membership registration failed: {0}")]
    Registration(String),

    // Election errors
    #[error("Campaign aborted: {0}")]
    CampaignAborted(String),

    // Observation errors
    #[error("Observation interrupted: {0}")]
    ObservationInterrupted(String),

    // Serialization errors
    #[error("Descriptor serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is fatal to the node and must trigger a shutdown
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Session(_) | Error::SessionClosed)
    }

    /// Check if this error is recoverable while the session is still alive
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CampaignAborted(_) | Error::ObservationInterrupted(_) | Error::Network(_)
        )
    }
}
