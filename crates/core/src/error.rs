use crate::frame::FrameError;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("rpc call failed: {0:#}")]
    Rpc(anyhow::Error),
    #[error("invalid audio payload: {0}")]
    Audio(#[from] base64::DecodeError),
}

impl ExecutorError {
    /// Whether the peer broke the stream protocol, as opposed to a failure on our side.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            ExecutorError::ProtocolViolation(_)
                | ExecutorError::Frame(FrameError::MalformedFrame(_))
                | ExecutorError::UnknownCommand(_)
                | ExecutorError::Audio(_)
        )
    }
}
