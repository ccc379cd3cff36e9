//! Error types for the sync engine.
//!
//! Each concern gets its own enum so that callers only match on what they
//! can actually receive:
//!
//! - [`ConfigError`]: refused at construction time, never at runtime.
//! - [`TransportError`]: socket faults; handled inside the connection task.
//! - [`PathError`]: a document write that cannot be applied.
//! - [`ProtocolError`]: one bad inbound frame; the frame is dropped.
//! - [`SyncError`]: what the public engine/store API returns.

use tokio_tungstenite::tungstenite;

/// Invalid or missing connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("server url must not be empty")]
    MissingServerUrl,

    #[error("invalid server url '{url}': {reason}")]
    InvalidServerUrl { url: String, reason: String },

    #[error("{0} must not be empty")]
    EmptyIdentity(&'static str),

    #[error("reconnect delay must be greater than zero")]
    ZeroReconnectDelay,

    #[error("offline queue capacity must be greater than zero")]
    ZeroQueueCapacity,

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Faults of the underlying duplex channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("connection to '{0}' refused")]
    Refused(String),

    #[error("connection closed")]
    Closed,
}

/// A path write rejected before the document is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("index {index} is too far past the end of an array of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// A single inbound frame that could not be applied.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("cannot apply message: {0}")]
    Path(#[from] PathError),

    #[error("message for '{key}' is missing field '{field}'")]
    MissingField { key: String, field: &'static str },
}

/// Errors returned by the public engine API.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("refusing to set undefined value at '{key}'")]
    UndefinedValue { key: String },

    #[error("no tokio runtime to run the connection on")]
    NoRuntime,

    #[error("engine was configured for {configured} addressing, not {requested}")]
    WrongAddressing {
        configured: &'static str,
        requested: &'static str,
    },
}
