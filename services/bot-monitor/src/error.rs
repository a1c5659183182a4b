//! Error types for the bot monitor

/// Errors raised by the monitor's gateways, storage and configuration
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Control plane returned {status}: {body}")]
    ControlPlane { status: u16, body: String },

    #[error("Invalid control plane response: {0}")]
    InvalidResponse(String),

    #[error("Notification to {recipient} failed: {reason}")]
    Notification { recipient: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

impl From<config::ConfigError> for MonitorError {
    fn from(e: config::ConfigError) -> Self {
        MonitorError::Config(e.to_string())
    }
}
