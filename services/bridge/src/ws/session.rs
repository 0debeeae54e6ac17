//! Manages the WebSocket connection lifecycle of a Twilio media stream.

use super::transport::WsTransport;
use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use callrelay_core::{
    ExecutorError, Session, SessionState, Transport, frame,
    host::{CLOSE_INTERNAL_ERROR, CLOSE_PROTOCOL_ERROR},
};
use futures_util::{StreamExt, stream::SplitStream};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

const CLOSE_GOING_AWAY: u16 = 1001;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Runs one media stream from upgrade to close.
#[instrument(name = "twilio_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4().to_string();
    tracing::Span::current().record("session_id", session_id.as_str());
    info!("New Twilio media stream connection.");

    let (socket_tx, mut socket_rx) = socket.split();
    let transport = Arc::new(WsTransport::new(socket_tx));
    let mut session = Session::new(session_id, transport.clone());

    if let Err(e) = run_session(&state, &mut session, &mut socket_rx).await {
        error!(error = %e, "Media stream terminated with error.");
        // Close reasons must fit in a control frame, so the details stay in the log.
        if e.is_protocol() {
            transport.disconnect("protocol error", CLOSE_PROTOCOL_ERROR).await;
        } else {
            transport.disconnect("internal error", CLOSE_INTERNAL_ERROR).await;
        }
    }

    if let Err(e) = state.executor.disconnect(&mut session).await {
        warn!(error = %e, "Failed to report disconnect.");
    }
    info!("Media stream closed.");
}

/// Feeds inbound frames to the executor until either side ends the stream.
async fn run_session(
    state: &AppState,
    session: &mut Session,
    socket_rx: &mut SplitStream<WebSocket>,
) -> Result<(), ExecutorError> {
    let handshake = tokio::time::sleep(state.config.handshake_timeout);
    tokio::pin!(handshake);

    loop {
        let msg = tokio::select! {
            _ = &mut handshake, if session.state() == SessionState::Idle => {
                warn!("No connected frame before the handshake deadline.");
                session
                    .transport()
                    .disconnect("handshake timeout", CLOSE_PROTOCOL_ERROR)
                    .await;
                return Ok(());
            }
            _ = state.shutdown.cancelled() => {
                session
                    .transport()
                    .disconnect("server shutting down", CLOSE_GOING_AWAY)
                    .await;
                return Ok(());
            }
            msg = socket_rx.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                let frame = frame::decode(text.as_str().as_bytes())?;
                trace!(event = frame.event(), "frame received");
                state.executor.handle_command(session, frame).await?;

                if session.is_terminated() {
                    return Ok(());
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!("Twilio closed the media stream.");
                return Ok(());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %e, "Error receiving from Twilio WebSocket.");
                return Ok(());
            }
        }
    }
}
