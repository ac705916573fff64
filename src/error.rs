use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Server-signalled error frame or an unsolicited RECONNECT.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A frame or event is missing fields its kind requires.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Channel {0} is offline")]
    StreamOffline(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
