use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Handshake error: {0}")]
    Handshake(String),

    #[error("Request timed out: {0}")]
    RequestTimeout(String),

    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    #[error("Connector is not initialized")]
    NotInitialized,

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent is disabled: {0}")]
    AgentDisabled(String),

    #[error("Concurrency limit exceeded: {limit} executions already running")]
    ConcurrencyLimitExceeded { limit: usize },

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Skill error: {0}")]
    Skill(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
