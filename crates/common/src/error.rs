//! Error types for hub connections.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Handshake or authentication failure while opening a hub.
    #[error("Connect error: {0}")]
    Connect(String),

    /// The transport went away mid-session.
    #[error("Transport lost: {0}")]
    TransportLost(String),

    /// An outbound invocation could not be issued or was rejected by the hub.
    #[error("Send error: {0}")]
    Send(String),

    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
