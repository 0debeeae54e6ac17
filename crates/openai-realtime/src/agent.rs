//! Lifecycle and I/O loops of the realtime agent.

use crate::{
    AgentConfig, AgentError,
    buffer::AudioBuffer,
    handler::{self, AudioChunk, Callbacks, FunctionCall, Transcript},
};
use base64::prelude::*;
use futures_util::{
    FutureExt, SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use openai_realtime_types::{ClientEvent, Item};
use secrecy::ExposeSecret;
use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{RwLock, mpsc},
};
use tokio_tungstenite::{
    WebSocketStream, connect_async,
    tungstenite::{
        client::IntoClientRequest,
        protocol::{CloseFrame, Message, frame::coding::CloseCode},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, trace};

/// Pending control and audio messages the writer may lag behind by.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Unstarted,
    Connecting,
    Live,
    Closed,
}

/// A cloneable handle to the agent's outbound queue.
///
/// Sends wait while the queue is full and fail once the writer has exited.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<ClientEvent>,
}

impl Outbound {
    pub async fn send(&self, event: ClientEvent) -> Result<(), AgentError> {
        self.tx.send(event).await.map_err(|_| AgentError::Closed)
    }

    /// Hands a function result back to the model and asks it to carry on.
    pub async fn submit_function_result(
        &self,
        call_id: impl Into<String>,
        output: impl Into<String>,
    ) -> Result<(), AgentError> {
        self.send(ClientEvent::ConversationItemCreate {
            item: Item::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.into(),
            },
        })
        .await?;
        self.send(ClientEvent::ResponseCreate).await
    }
}

struct Connection {
    cancel: CancellationToken,
}

/// A single telephony call's connection to the OpenAI Realtime API.
pub struct RealtimeAgent {
    config: AgentConfig,
    callbacks: Callbacks,
    outbound: Outbound,
    queue: Mutex<Option<mpsc::Receiver<ClientEvent>>>,
    buffer: tokio::sync::Mutex<AudioBuffer>,
    // Written once by `start`, read by `close` and status checks.
    conn: RwLock<Option<Connection>>,
    state: Mutex<AgentState>,
}

impl std::fmt::Debug for RealtimeAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeAgent")
            .field("config", &self.config)
            .field("callbacks", &self.callbacks)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RealtimeAgent {
    pub fn new(config: AgentConfig) -> Self {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        Self {
            config,
            callbacks: Callbacks::default(),
            outbound: Outbound { tx },
            queue: Mutex::new(Some(rx)),
            buffer: tokio::sync::Mutex::new(AudioBuffer::default()),
            conn: RwLock::new(None),
            state: Mutex::new(AgentState::Unstarted),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn on_transcript<F, Fut>(&mut self, f: F)
    where
        F: Fn(Transcript) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks.transcript = Some(Arc::new(move |t| f(t).boxed()));
    }

    pub fn on_audio<F, Fut>(&mut self, f: F)
    where
        F: Fn(AudioChunk) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks.audio = Some(Arc::new(move |a| f(a).boxed()));
    }

    pub fn on_function_call<F, Fut>(&mut self, f: F)
    where
        F: Fn(FunctionCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks.function_call = Some(Arc::new(move |c| f(c).boxed()));
    }

    /// A handle callbacks can keep to talk back to the model.
    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    pub fn state(&self) -> AgentState {
        *lock(&self.state)
    }

    /// Whether the connection is up and neither side has torn it down.
    #[cfg(test)]
    pub(crate) async fn is_connected(&self) -> bool {
        if self.state() != AgentState::Live {
            return false;
        }
        let conn = self.conn.read().await;
        conn.as_ref().is_some_and(|c| !c.cancel.is_cancelled())
    }

    /// Bytes waiting for the next flush.
    pub async fn buffered_len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Dials the realtime endpoint, configures the session and spawns the I/O loops.
    ///
    /// The connection lives until [`RealtimeAgent::close`] is called, `parent` is
    /// cancelled, or either side of the socket fails.
    pub async fn start(&self, parent: &CancellationToken) -> Result<(), AgentError> {
        {
            let mut state = lock(&self.state);
            if *state != AgentState::Unstarted {
                return Err(AgentError::AlreadyStarted);
            }
            *state = AgentState::Connecting;
        }

        match self.dial().await {
            Ok(stream) => self.attach(stream, parent).await,
            Err(e) => {
                let mut state = lock(&self.state);
                if *state == AgentState::Connecting {
                    *state = AgentState::Unstarted;
                }
                Err(e)
            }
        }
    }

    async fn dial(
        &self,
    ) -> Result<
        WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        AgentError,
    > {
        let mut request = self
            .config
            .endpoint()
            .into_client_request()
            .map_err(AgentError::Connect)?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.config.api_key.expose_secret()).parse()?,
        );
        request
            .headers_mut()
            .insert("OpenAI-Beta", "realtime=v1".parse()?);

        let (stream, _) = connect_async(request)
            .await
            .map_err(AgentError::Connect)?;
        Ok(stream)
    }

    async fn attach<S>(
        &self,
        stream: WebSocketStream<S>,
        parent: &CancellationToken,
    ) -> Result<(), AgentError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Some(queue) = lock(&self.queue).take() else {
            return Err(AgentError::AlreadyStarted);
        };
        let cancel = parent.child_token();

        // Held until `Live` is published so a concurrent `close` always finds the token.
        let mut conn = self.conn.write().await;
        {
            let mut state = lock(&self.state);
            if *state == AgentState::Closed {
                // Closed while dialing; dropping the stream hangs up.
                return Err(AgentError::Closed);
            }
            *state = AgentState::Live;
        }
        *conn = Some(Connection {
            cancel: cancel.clone(),
        });
        drop(conn);

        debug!(component = "openai", model = %self.config.model, "connected to OpenAI WebSocket");

        self.outbound
            .send(ClientEvent::SessionUpdate {
                session: self.config.session(),
            })
            .await?;

        let (sink, source) = stream.split();
        tokio::spawn(write_loop(sink, queue, cancel.clone()).in_current_span());
        tokio::spawn(read_loop(source, self.callbacks.clone(), cancel).in_current_span());

        Ok(())
    }

    /// Buffers caller audio and queues it once a flush's worth has accumulated.
    pub async fn enqueue_audio(&self, audio: &[u8]) -> Result<(), AgentError> {
        let mut buffer = self.buffer.lock().await;

        if let Some(chunk) = buffer.push(audio) {
            let encoded = BASE64_STANDARD.encode(&chunk);
            self.outbound
                .send(ClientEvent::InputAudioBufferAppend { audio: encoded })
                .await?;
        }

        Ok(())
    }

    pub async fn submit_function_result(
        &self,
        call_id: impl Into<String>,
        output: impl Into<String>,
    ) -> Result<(), AgentError> {
        self.outbound.submit_function_result(call_id, output).await
    }

    /// Tears the connection down. Safe to call repeatedly and before `start`.
    pub async fn close(&self) {
        {
            let mut state = lock(&self.state);
            if *state == AgentState::Closed {
                return;
            }
            *state = AgentState::Closed;
        }

        if let Some(conn) = self.conn.read().await.as_ref() {
            conn.cancel.cancel();
        }

        debug!(component = "openai", "agent closed");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn read_loop<S>(
    mut source: SplitStream<WebSocketStream<S>>,
    callbacks: Callbacks,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = source.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                trace!(component = "openai", msg = %text, "received message from OpenAI WebSocket");
                handler::handle_text(&callbacks, &text).await;
            }
            Some(Ok(Message::Close(frame))) => {
                info!(component = "openai", ?frame, "OpenAI WebSocket closed by server");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(component = "openai", error = %e, "could not read message from OpenAI WebSocket");
                break;
            }
            None => {
                debug!(component = "openai", "OpenAI WebSocket stream ended");
                break;
            }
        }
    }

    cancel.cancel();
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut queue: mpsc::Receiver<ClientEvent>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!(component = "openai", error = %e, "could not send close frame");
                }
                let _ = sink.close().await;
                break;
            }
            event = queue.recv() => {
                let Some(event) = event else { break };

                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(component = "openai", kind = event.event_type(), error = %e, "could not encode client event");
                        continue;
                    }
                };

                if let Err(e) = sink.send(Message::Text(text)).await {
                    error!(component = "openai", error = %e, "could not write message to OpenAI WebSocket");
                    cancel.cancel();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BYTES_PER_PACKET, PACKETS_PER_FLUSH};
    use serde_json::Value;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

    const WAIT: Duration = Duration::from_secs(5);

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (tcp, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(tcp).await.unwrap()
    }

    async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
        loop {
            let msg = tokio::time::timeout(WAIT, ws.next())
                .await
                .expect("timed out waiting for a message")
                .expect("stream ended")
                .expect("read failed");
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    fn agent_for(url: &str) -> RealtimeAgent {
        let mut config = AgentConfig::new("sk-test");
        config.url = url.to_string();
        config.prompt = Some("You manage tasks.".to_string());
        RealtimeAgent::new(config)
    }

    async fn started(url: &str, listener: &TcpListener) -> (RealtimeAgent, WebSocketStream<TcpStream>) {
        let agent = agent_for(url);
        let root = CancellationToken::new();
        let (started, mut server) = tokio::join!(agent.start(&root), accept(listener));
        started.unwrap();

        let update = next_json(&mut server).await;
        assert_eq!(update["type"], "session.update");
        (agent, server)
    }

    #[tokio::test]
    async fn test_start_sends_auth_headers_and_session_update() {
        let (listener, url) = listen().await;
        let agent = agent_for(&url);
        let root = CancellationToken::new();

        let server = async {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut headers = None;
            let ws = tokio_tungstenite::accept_hdr_async(tcp, |req: &Request, resp: Response| {
                headers = Some((
                    req.uri().to_string(),
                    req.headers().get("Authorization").cloned(),
                    req.headers().get("OpenAI-Beta").cloned(),
                ));
                Ok(resp)
            })
            .await
            .unwrap();
            (ws, headers.unwrap())
        };

        let (started, (mut ws, (uri, auth, beta))) = tokio::join!(agent.start(&root), server);
        started.unwrap();

        assert!(uri.ends_with("?model=gpt-4o-realtime-preview-2024-10-01"));
        assert_eq!(auth.unwrap(), "Bearer sk-test");
        assert_eq!(beta.unwrap(), "realtime=v1");
        assert_eq!(agent.state(), AgentState::Live);

        let update = next_json(&mut ws).await;
        assert_eq!(update["type"], "session.update");
        assert_eq!(update["session"]["input_audio_format"], "g711_ulaw");
        assert_eq!(update["session"]["output_audio_format"], "g711_ulaw");
        assert_eq!(update["session"]["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(update["session"]["instructions"], "You manage tasks.");

        agent.close().await;
    }

    #[tokio::test]
    async fn test_start_fails_when_endpoint_is_down() {
        let (listener, url) = listen().await;
        drop(listener);

        let agent = agent_for(&url);
        let err = agent.start(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, AgentError::Connect(_)));
        assert_eq!(agent.state(), AgentState::Unstarted);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (listener, url) = listen().await;
        let (agent, _server) = started(&url, &listener).await;

        let err = agent.start(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::AlreadyStarted));

        agent.close().await;
    }

    #[tokio::test]
    async fn test_audio_is_flushed_once_past_threshold() {
        let (listener, url) = listen().await;
        let (agent, mut server) = started(&url, &listener).await;

        let mut expected = Vec::new();
        for i in 0..=PACKETS_PER_FLUSH {
            let packet = vec![i as u8; BYTES_PER_PACKET];
            expected.extend_from_slice(&packet);
            agent.enqueue_audio(&packet).await.unwrap();
        }
        agent.enqueue_audio(&[0xff; 10]).await.unwrap();

        let append = next_json(&mut server).await;
        assert_eq!(append["type"], "input_audio_buffer.append");
        let audio = BASE64_STANDARD
            .decode(append["audio"].as_str().unwrap())
            .unwrap();
        assert_eq!(audio, expected);
        assert_eq!(agent.buffered_len().await, 10);

        agent.close().await;
    }

    #[tokio::test]
    async fn test_function_result_is_followed_by_response_create() {
        let (listener, url) = listen().await;
        let (agent, mut server) = started(&url, &listener).await;

        agent
            .submit_function_result("c1", r#"{"todos":[]}"#)
            .await
            .unwrap();

        let item = next_json(&mut server).await;
        assert_eq!(item["type"], "conversation.item.create");
        assert_eq!(item["item"]["type"], "function_call_output");
        assert_eq!(item["item"]["call_id"], "c1");
        assert_eq!(item["item"]["output"], r#"{"todos":[]}"#);

        let trigger = next_json(&mut server).await;
        assert_eq!(trigger["type"], "response.create");

        agent.close().await;
    }

    #[tokio::test]
    async fn test_server_events_reach_callbacks() {
        let (listener, url) = listen().await;
        let mut agent = agent_for(&url);
        let (tx, mut rx) = mpsc::unbounded_channel();
        agent.on_audio(move |chunk| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(chunk);
            }
        });

        let root = CancellationToken::new();
        let (started, mut server) = tokio::join!(agent.start(&root), accept(&listener));
        started.unwrap();
        next_json(&mut server).await;

        server
            .send(Message::Text(
                r#"{"type":"response.audio.delta","item_id":"it1","delta":"QUJD"}"#.into(),
            ))
            .await
            .unwrap();

        let chunk = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(chunk.delta, "QUJD");
        assert_eq!(chunk.item_id, "it1");

        agent.close().await;
    }

    #[tokio::test]
    async fn test_close_twice_sends_one_close_frame() {
        let (listener, url) = listen().await;
        let (agent, mut server) = started(&url, &listener).await;

        agent.close().await;
        agent.close().await;
        assert_eq!(agent.state(), AgentState::Closed);

        let mut close_frames = 0;
        while let Ok(Some(msg)) = tokio::time::timeout(WAIT, server.next()).await {
            match msg {
                Ok(Message::Close(frame)) => {
                    close_frames += 1;
                    assert_eq!(frame.unwrap().code, CloseCode::Normal);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        assert_eq!(close_frames, 1);
        assert!(!agent.is_connected().await);
    }

    #[tokio::test]
    async fn test_close_without_start_is_harmless() {
        let agent = agent_for("ws://127.0.0.1:9");

        agent.close().await;
        agent.close().await;

        assert_eq!(agent.state(), AgentState::Closed);
        assert!(!agent.is_connected().await);
    }

    #[tokio::test]
    async fn test_server_hangup_ends_the_agent() {
        let (listener, url) = listen().await;
        let (agent, server) = started(&url, &listener).await;
        assert!(agent.is_connected().await);

        drop(server);

        let mut connected = true;
        for _ in 0..100 {
            if !agent.is_connected().await {
                connected = false;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!connected);

        agent.close().await;
    }

    #[tokio::test]
    async fn test_parent_cancellation_closes_the_connection() {
        let (listener, url) = listen().await;
        let agent = agent_for(&url);
        let root = CancellationToken::new();
        let (started, mut server) = tokio::join!(agent.start(&root), accept(&listener));
        started.unwrap();
        next_json(&mut server).await;

        root.cancel();

        let msg = tokio::time::timeout(WAIT, server.next()).await.unwrap();
        assert!(matches!(msg, Some(Ok(Message::Close(_)))));
        assert!(!agent.is_connected().await);
    }

    #[tokio::test]
    async fn test_close_racing_start_still_hangs_up() {
        let (listener, url) = listen().await;
        let agent = agent_for(&url);
        let root = CancellationToken::new();

        let server = async {
            let ws = accept(&listener).await;
            agent.close().await;
            ws
        };
        let (_, mut server) = tokio::join!(agent.start(&root), server);
        assert_eq!(agent.state(), AgentState::Closed);

        // Whichever side wins, the socket ends without the parent being cancelled.
        loop {
            let msg = tokio::time::timeout(WAIT, server.next())
                .await
                .expect("connection outlived close");
            match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
        assert!(!root.is_cancelled());
        assert!(!agent.is_connected().await);
    }
}
