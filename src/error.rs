use thiserror::Error;

/// Main error type for the uplink server, agent, and CLI
#[derive(Error, Debug)]
pub enum UplinkError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Control-plane errors
    #[error("Agent not connected: {0}")]
    AgentNotConnected(String),

    #[error("Agent busy: {0} already has an active transfer")]
    AgentBusy(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    // Data-plane errors
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Inactivity timeout: {0}")]
    InactivityTimeout(String),

    #[error("Agent disconnected: {0}")]
    AgentDisconnected(String),

    #[error("Connection replaced: {0}")]
    ConnectionReplaced(String),

    #[error("Artifact write failure: {0}")]
    ArtifactWrite(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for UplinkError
pub type Result<T> = std::result::Result<T, UplinkError>;
