//! Error types for the sensor bridge

/// Errors that can occur in the sensor bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Whether retrying the failed call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::StoreUnavailable(_))
    }
}

/// Result type alias for sensor bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
