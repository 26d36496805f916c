//! Error types for the HSM agent
//!
//! Per-message failures (`Parse`, `Authentication`, `NotFound`, `Hardware`)
//! are logged and dropped at the dispatch boundary. `Transport` failures end
//! the session and are retried by the supervisor.

/// Main error type for agent operations
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Read error: {0}")]
    Read(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Whether this error should tear down the session it occurred on
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Short label used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::Authentication(_) => "authentication",
            Self::NotFound(_) => "not_found",
            Self::Transport(_) => "transport",
            Self::Hardware(_) => "hardware",
            Self::Config(_) => "config",
            Self::Read(_) => "read",
            Self::Write(_) => "write",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        Self::Read(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(format!("JSON error: {}", err))
    }
}

impl From<base64::DecodeError> for AgentError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Parse(format!("Base64 error: {}", err))
    }
}

impl From<ssh_key::Error> for AgentError {
    fn from(err: ssh_key::Error) -> Self {
        Self::Parse(format!("SSH key error: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AgentError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;
