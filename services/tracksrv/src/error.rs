//! Error handling for the tracking service.

use thiserror::Error;

/// Tracking Service Error Type
#[derive(Error, Debug)]
pub enum TrackSrvError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),

    /// Wire framing errors (malformed markers, lengths, terminators)
    #[error("Frame error: {0}")]
    FrameError(String),

    /// Connection establishment and maintenance errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Field-level parsing errors
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Operation timeout errors
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Persistence collaborator errors
    #[error("Storage error: {0}")]
    StorageError(String),

    /// General internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the tracking service
pub type Result<T> = std::result::Result<T, TrackSrvError>;

impl From<std::io::Error> for TrackSrvError {
    fn from(err: std::io::Error) -> Self {
        TrackSrvError::IoError(err.to_string())
    }
}

impl From<figment::Error> for TrackSrvError {
    fn from(err: figment::Error) -> Self {
        TrackSrvError::ConfigError(err.to_string())
    }
}

impl From<serde_yaml::Error> for TrackSrvError {
    fn from(err: serde_yaml::Error) -> Self {
        TrackSrvError::ConfigError(format!("YAML error: {err}"))
    }
}

impl From<fleet_model::StoreError> for TrackSrvError {
    fn from(err: fleet_model::StoreError) -> Self {
        TrackSrvError::StorageError(err.to_string())
    }
}

// Helper methods for creating errors
impl TrackSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        TrackSrvError::ConfigError(msg.into())
    }

    pub fn frame(msg: impl Into<String>) -> Self {
        TrackSrvError::FrameError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        TrackSrvError::ConnectionError(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        TrackSrvError::ParseError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        TrackSrvError::InternalError(msg.into())
    }
}
