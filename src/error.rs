//! Error types for vrcam

use thiserror::Error;

/// Main error type for vrcam
#[derive(Error, Debug)]
pub enum VrcamError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("Frame source error: {0}")]
    Source(#[from] SourceError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Detector model errors. Always raised at construction time.
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to read detector model {path}: {message}")]
    ReadModel { path: String, message: String },

    #[error("Failed to parse detector model {path}: {message}")]
    ParseModel { path: String, message: String },

    #[error("Unsupported detector model {path}: {message}")]
    Unsupported { path: String, message: String },
}

/// Frame source errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open frame source {source_name}: {message}")]
    Open { source_name: String, message: String },

    #[error("Frame source {0} is not open")]
    NotOpen(String),

    #[error("Frame source {0} has no more frames")]
    Exhausted(String),

    #[error("Frame source {source_name} failed: {message}")]
    Device { source_name: String, message: String },
}

/// Per-frame and loop lifecycle errors
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Frame shape mismatch: expected {expected:?}, got {actual:?}")]
    FrameShape {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Tracking loop is already running")]
    AlreadyRunning,
}

/// Network output errors
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to bind OSC socket: {0}")]
    Bind(String),

    #[error("Invalid OSC target address: {0}")]
    InvalidTarget(String),

    #[error("OSC encode error: {0}")]
    Encode(String),

    #[error("OSC send error: {0}")]
    Send(String),
}

/// Result type alias for vrcam operations
pub type Result<T> = std::result::Result<T, VrcamError>;
