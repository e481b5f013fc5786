use std::time::Duration;

use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Relay gateway session/transport error.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Placement directory error.
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Edge agent error.
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// Wire encoding error.
    #[error("Proto error: {0}")]
    Proto(#[from] ProtoError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error.
    #[error("JSON parse error: {0}")]
    Json(String),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// Relay gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Link read/write failure. Terminal for the owning session.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A link read exceeded the configured deadline.
    #[error("Read deadline of {0:?} elapsed")]
    ReadTimeout(Duration),

    /// A frame could not be decoded as a link message.
    #[error("Decode error: {0}")]
    Decode(#[from] ProtoError),

    /// No session is registered for the node.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The session exists but the requested link is not up.
    #[error("No {link} link established for {node_id}")]
    LinkNotEstablished { node_id: String, link: String },

    /// Listener could not be bound or the server failed.
    #[error("Server error: {0}")]
    Server(String),
}

/// Placement directory errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Every known gateway is stale or was never probed.
    #[error("No gateway is available")]
    NoAvailableGateway,

    /// A health probe failed. Absorbed by the health checker.
    #[error("Probe of {home} failed: {reason}")]
    Probe { home: String, reason: String },

    /// Listener could not be bound or the server failed.
    #[error("Server error: {0}")]
    Server(String),

    #[error("Invalid directory settings: {0}")]
    InvalidSettings(String),
}

/// Edge agent errors
#[derive(Debug, Error)]
pub enum AgentError {
    /// Directory request failed or returned no gateway.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Link dial failed.
    #[error("Dial failed: {0}")]
    Dial(String),

    /// Established link failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A reply did not arrive within the configured deadline.
    #[error("Read deadline of {0:?} elapsed")]
    ReadTimeout(Duration),

    #[error("Invalid agent settings: {0}")]
    InvalidSettings(String),
}

/// Wire encoding errors
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Frame is not a valid link message.
    #[error("Invalid message frame: {0}")]
    Decode(String),

    /// Message could not be serialized.
    #[error("Serialization error: {0}")]
    Encode(String),
}
