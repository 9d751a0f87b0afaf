use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection rejected: {0}")]
    Rejected(String),
    #[error("connection timed out")]
    Timeout,
    #[error("connection closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("an auth token is required for realtime")]
    MissingToken,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("realtime client is closed")]
    Closed,
    #[error("realtime emit buffer is full")]
    BufferFull,
}
