use thiserror::Error;

/// Main error type for the federation aggregator
#[derive(Error, Debug)]
pub enum FedError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Relay unavailable: {0}")]
    RelayUnavailable(String),

    #[error("Timed out after {elapsed_ms}ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Event decode error: {0}")]
    Decode(String),

    // Federation errors
    #[error("Coordinator not found: {alias}")]
    CoordinatorNotFound { alias: String },

    #[error("Coordinator alias already registered: {alias}")]
    AliasConflict { alias: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for FedError
pub type Result<T> = std::result::Result<T, FedError>;

impl FedError {
    pub fn not_found(alias: impl Into<String>) -> Self {
        FedError::CoordinatorNotFound {
            alias: alias.into(),
        }
    }

    /// True for errors caused by a remote peer rather than local misuse.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            FedError::Http(_)
                | FedError::WebSocket(_)
                | FedError::RelayUnavailable(_)
                | FedError::Timeout { .. }
        )
    }
}
