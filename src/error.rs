use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the client core.
///
/// Nothing here is fatal to the process; callers translate these into
/// user-visible events and, where a connection is involved, into the
/// reconnect path.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection is not open")]
    NotConnected,

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed chunk frame: {0}")]
    BadFrame(String),

    #[error("invalid endpoint url: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}
