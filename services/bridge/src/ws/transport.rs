use anyhow::{Result, bail};
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use callrelay_core::{OutboundFrame, Transport, frame};
use futures_util::{SinkExt, stream::SplitSink};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// The write half of a Twilio media stream socket.
pub struct WsTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    closed: AtomicBool,
}

impl WsTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, outbound: &OutboundFrame) -> Result<()> {
        if self.is_closed() {
            bail!("transport closed");
        }

        let text = frame::encode(outbound)?;
        self.sink.lock().await.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn disconnect(&self, reason: &str, code: u16) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let close = Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        }));
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(close).await {
            debug!(error = %e, "could not send close frame");
        }
        let _ = sink.close().await;
    }
}
