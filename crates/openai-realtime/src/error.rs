use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("could not dial OpenAI WebSocket: {0}")]
    Connect(#[source] tungstenite::Error),
    #[error("invalid request header: {0}")]
    InvalidHeader(#[from] tungstenite::http::header::InvalidHeaderValue),
    #[error("agent was already started")]
    AlreadyStarted,
    #[error("agent connection is closed")]
    Closed,
}
