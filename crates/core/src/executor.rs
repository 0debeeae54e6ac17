//! Turns Twilio Media Streams frames into backend RPC calls and AI agent traffic.

use crate::{
    error::ExecutorError,
    frame::{DtmfPayload, Frame, MediaPayload, OutboundFrame, StartPayload, Track, decode_outbound},
    host::{AppReply, CLOSE_NORMAL, RpcGateway, Transport},
    session::{Session, SessionState},
};
use anyhow::{Context, bail};
use base64::prelude::*;
use openai_realtime::{AgentConfig, AudioChunk, FunctionCall, RealtimeAgent, Transcript};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const CHANNEL_NAME: &str = "Twilio::MediaStreamChannel";
pub const CONFIGURATION_EVENT: &str = "openai.configuration";
pub const FUNCTION_CALL_RESULT_EVENT: &str = "openai.function_call_result";

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    /// Expected `accountSid` of incoming streams. `None` accepts any account.
    pub account_sid: Option<String>,
    pub openai_url: String,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            openai_url: openai_realtime::DEFAULT_URL.to_string(),
        }
    }
}

/// AI settings handed out by the backend in an `openai.configuration` reply.
#[derive(Debug, Deserialize)]
struct OpenAiSettings {
    api_key: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    /// Either a JSON document encoded as a string or the tool list itself.
    #[serde(default)]
    tools: Option<Value>,
}

/// The channel identifier for a stream.
pub fn channel_id(stream_sid: &str) -> String {
    json!({ "channel": CHANNEL_NAME, "stream_sid": stream_sid }).to_string()
}

fn mask_sid(sid: &str) -> String {
    let prefix: String = sid.chars().take(5).collect();
    format!("{prefix}***")
}

/// A session's handle on the media stream channel. Cheap to clone into callbacks.
///
/// Whatever the backend transmits in response to a command is relayed to the caller
/// before the command returns.
#[derive(Clone)]
struct RpcChannel {
    rpc: Arc<dyn RpcGateway>,
    transport: Arc<dyn Transport>,
    session_id: String,
    identifier: String,
}

impl RpcChannel {
    fn new(rpc: Arc<dyn RpcGateway>, session: &Session, stream_sid: &str) -> Self {
        Self {
            rpc,
            transport: session.transport.clone(),
            session_id: session.id().to_string(),
            identifier: channel_id(stream_sid),
        }
    }

    async fn subscribe(&self) -> anyhow::Result<()> {
        let result = self.rpc.subscribe(&self.session_id, &self.identifier).await?;
        self.relay(result.transmissions).await;
        Ok(())
    }

    async fn perform(
        &self,
        action: &str,
        fields: &[(&str, &str)],
    ) -> anyhow::Result<Option<AppReply>> {
        let mut data = Map::new();
        for (key, value) in fields {
            data.insert(key.to_string(), Value::from(*value));
        }
        data.insert("action".to_string(), Value::from(action));

        let payload = Value::Object(data).to_string();
        let result = self
            .rpc
            .perform(&self.session_id, &self.identifier, &payload)
            .await
            .with_context(|| format!("{action} rpc failed"))?;

        self.relay(result.transmissions).await;
        Ok(result.reply)
    }

    async fn relay(&self, transmissions: Vec<String>) {
        for raw in transmissions {
            let frame = match decode_outbound(&raw) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "dropping backend transmission");
                    continue;
                }
            };
            if let Err(e) = self.transport.send(&frame).await {
                warn!(error = %format!("{e:#}"), "could not relay backend transmission");
                return;
            }
        }
    }
}

/// Drives sessions through `Idle -> Connected -> Streaming -> Terminated`.
///
/// The host calls [`Executor::handle_command`] serially for each session and
/// [`Executor::disconnect`] once the connection is gone.
pub struct Executor {
    rpc: Arc<dyn RpcGateway>,
    config: TwilioConfig,
    shutdown: CancellationToken,
}

impl Executor {
    /// `shutdown` is the parent of every agent's cancellation token.
    pub fn new(rpc: Arc<dyn RpcGateway>, config: TwilioConfig, shutdown: CancellationToken) -> Self {
        Self {
            rpc,
            config,
            shutdown,
        }
    }

    pub async fn handle_command(
        &self,
        session: &mut Session,
        frame: Frame,
    ) -> Result<(), ExecutorError> {
        if session.state == SessionState::Terminated {
            return Err(ExecutorError::ProtocolViolation("session terminated"));
        }

        if let Frame::Connected { protocol, version } = &frame {
            if session.state != SessionState::Idle {
                return Err(ExecutorError::ProtocolViolation("already connected"));
            }
            debug!(%protocol, %version, "stream connected");
            session.state = SessionState::Connected;
            return Ok(());
        }

        if session.state == SessionState::Idle {
            return Err(ExecutorError::ProtocolViolation("must connect first"));
        }

        match frame {
            Frame::Connected { .. } => Ok(()),
            Frame::Start { start, .. } => self.start(session, start).await,
            Frame::Media { media, .. } => self.media(session, media).await,
            Frame::Mark { mark } => {
                debug!(name = %mark.name, "mark received");
                Ok(())
            }
            Frame::Dtmf { dtmf } => {
                self.dtmf(session, dtmf).await;
                Ok(())
            }
            Frame::Stop => {
                debug!("stop received, disconnecting");
                session
                    .transport
                    .disconnect("stream stopped", CLOSE_NORMAL)
                    .await;
                session.state = SessionState::Terminated;
                Ok(())
            }
            other @ Frame::Clear => Err(ExecutorError::UnknownCommand(other.event().to_string())),
        }
    }

    /// Closes the session's agent and tells the backend the stream is gone.
    pub async fn disconnect(&self, session: &mut Session) -> Result<(), ExecutorError> {
        session.state = SessionState::Terminated;

        if let Some(agent) = &session.context.agent {
            agent.close().await;
        }

        if !session.authenticated {
            return Ok(());
        }

        self.rpc
            .disconnect(session.id())
            .await
            .map_err(ExecutorError::Rpc)
    }

    async fn start(&self, session: &mut Session, start: StartPayload) -> Result<(), ExecutorError> {
        if session.state == SessionState::Streaming {
            return Err(ExecutorError::ProtocolViolation("already started"));
        }

        debug!(stream_sid = %start.stream_sid, call_sid = %start.call_sid, "incoming start message");

        if let Some(expected) = &self.config.account_sid {
            if *expected != start.account_sid {
                info!(account_sid = %mask_sid(&start.account_sid), "unauthenticated stream");
                session
                    .transport
                    .disconnect("Auth Failed", CLOSE_NORMAL)
                    .await;
                session.state = SessionState::Terminated;
                return Ok(());
            }
        }

        session.context.call_sid = Some(start.call_sid.clone());
        session.context.stream_sid = Some(start.stream_sid.clone());
        session.authenticated = true;

        let identifiers = json!({
            "call_sid": &start.call_sid,
            "stream_sid": &start.stream_sid,
        })
        .to_string();
        self.rpc.authenticated(session.id(), &identifiers).await;

        let channel = RpcChannel::new(self.rpc.clone(), session, &start.stream_sid);
        channel.subscribe().await.map_err(ExecutorError::Rpc)?;

        match self.init_agent(channel, &start.stream_sid).await {
            Ok(Some(agent)) => {
                info!(model = %agent.config().model, "AI agent started");
                session.context.agent = Some(agent);
            }
            Ok(None) => debug!("no AI configuration provided, streaming without AI"),
            Err(e) => error!(error = %format!("{e:#}"), "AI disabled for this call"),
        }

        session.state = SessionState::Streaming;
        Ok(())
    }

    async fn init_agent(
        &self,
        channel: RpcChannel,
        stream_sid: &str,
    ) -> anyhow::Result<Option<Arc<RealtimeAgent>>> {
        let Some(reply) = channel.perform("configure_openai", &[]).await? else {
            return Ok(None);
        };

        if reply.event != CONFIGURATION_EVENT {
            bail!("unexpected reply event from RPC: {}", reply.event);
        }

        let settings: OpenAiSettings =
            serde_json::from_value(reply.data).context("failed to parse OpenAI config from RPC")?;

        let mut config = AgentConfig::new(settings.api_key);
        config.url = self.config.openai_url.clone();
        if let Some(model) = settings.model.filter(|m| !m.is_empty()) {
            config.model = model;
        }
        if let Some(voice) = settings.voice.filter(|v| !v.is_empty()) {
            config.voice = voice;
        }
        config.prompt = settings.prompt.filter(|p| !p.is_empty());
        config.tools = match settings.tools {
            Some(Value::String(raw)) if raw.is_empty() => None,
            Some(Value::String(raw)) => {
                Some(serde_json::from_str(&raw).context("failed to parse OpenAI tools from RPC")?)
            }
            Some(Value::Null) | None => None,
            Some(tools) => Some(tools),
        };

        let mut agent = RealtimeAgent::new(config);
        wire_callbacks(&mut agent, channel, stream_sid);

        let agent = Arc::new(agent);
        agent
            .start(&self.shutdown)
            .await
            .context("could not connect to OpenAI")?;

        Ok(Some(agent))
    }

    async fn media(&self, session: &mut Session, media: MediaPayload) -> Result<(), ExecutorError> {
        // The far end echoes our own audio back on the outbound track.
        if media.track == Track::Outbound {
            return Ok(());
        }

        let Some(agent) = &session.context.agent else {
            return Ok(());
        };

        let audio = BASE64_STANDARD.decode(media.payload.as_bytes())?;

        if let Err(e) = agent.enqueue_audio(&audio).await {
            debug!(error = %e, "dropping caller audio");
        }

        Ok(())
    }

    async fn dtmf(&self, session: &Session, dtmf: DtmfPayload) {
        // The channel is keyed by the stream, which is only known after `start`.
        let Some(stream_sid) = &session.context.stream_sid else {
            warn!(digit = %dtmf.digit, "dtmf before start, dropping");
            return;
        };

        let channel = RpcChannel::new(self.rpc.clone(), session, stream_sid);

        if let Err(e) = channel.perform("handle_dtmf", &[("digit", &dtmf.digit)]).await {
            error!(error = %format!("{e:#}"), "failed to perform handle_dtmf rpc");
        }
    }
}

fn wire_callbacks(agent: &mut RealtimeAgent, channel: RpcChannel, stream_sid: &str) {
    let rpc = channel.clone();
    agent.on_transcript(move |t: Transcript| {
        let rpc = rpc.clone();
        async move {
            let fields = [
                ("role", t.role.as_str()),
                ("text", t.text.as_str()),
                ("id", t.item_id.as_str()),
            ];
            if let Err(e) = rpc.perform("handle_transcript", &fields).await {
                error!(error = %format!("{e:#}"), "failed to perform handle_transcript rpc");
            }
        }
    });

    let transport = channel.transport.clone();
    let stream_sid = stream_sid.to_string();
    agent.on_audio(move |chunk: AudioChunk| {
        let transport = transport.clone();
        let stream_sid = stream_sid.clone();
        async move {
            let frames = [
                OutboundFrame::media(&stream_sid, chunk.delta),
                OutboundFrame::mark(&stream_sid, format!("ai-delta-{}", chunk.item_id)),
            ];
            for frame in &frames {
                if let Err(e) = transport.send(frame).await {
                    warn!(error = %format!("{e:#}"), "could not relay AI audio");
                    return;
                }
            }
        }
    });

    let outbound = agent.outbound();
    agent.on_function_call(move |call: FunctionCall| {
        let rpc = channel.clone();
        let outbound = outbound.clone();
        async move {
            let fields = [
                ("name", call.name.as_str()),
                ("arguments", call.arguments.as_str()),
            ];
            let reply = match rpc.perform("handle_function_call", &fields).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!(error = %format!("{e:#}"), "failed to perform handle_function_call rpc");
                    return;
                }
            };

            let Some(reply) = reply.filter(|r| r.event == FUNCTION_CALL_RESULT_EVENT) else {
                return;
            };
            let output = match reply.data {
                Value::String(s) => s,
                other => other.to_string(),
            };
            if let Err(e) = outbound.submit_function_result(call.call_id, output).await {
                warn!(error = %e, "could not submit function result");
            }
        }
    });
}
