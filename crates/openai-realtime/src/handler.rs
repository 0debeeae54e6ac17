//! Demultiplexes server events into the agent's callbacks.

use futures_util::future::BoxFuture;
use openai_realtime_types::{
    Role, ServerEvent, TranscriptEvent,
    server::{OutputItem, ResponseStatus},
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A non-empty transcript fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub role: Role,
    pub text: String,
    pub item_id: String,
}

/// A chunk of synthesized speech, still base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub delta: String,
    pub item_id: String,
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
    pub call_id: String,
}

pub type TranscriptCallback = Arc<dyn Fn(Transcript) -> BoxFuture<'static, ()> + Send + Sync>;
pub type AudioCallback = Arc<dyn Fn(AudioChunk) -> BoxFuture<'static, ()> + Send + Sync>;
pub type FunctionCallCallback = Arc<dyn Fn(FunctionCall) -> BoxFuture<'static, ()> + Send + Sync>;

/// The three callback slots. Each one is awaited by the reader before it reads the
/// next event, so invocations are sequential and in arrival order.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub transcript: Option<TranscriptCallback>,
    pub audio: Option<AudioCallback>,
    pub function_call: Option<FunctionCallCallback>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("transcript", &self.transcript.is_some())
            .field("audio", &self.audio.is_some())
            .field("function_call", &self.function_call.is_some())
            .finish()
    }
}

impl Callbacks {
    /// Routes one decoded server event.
    pub async fn dispatch(&self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated
            | ServerEvent::SessionUpdated
            | ServerEvent::InputAudioBufferSpeechStarted
            | ServerEvent::InputAudioBufferSpeechStopped
            | ServerEvent::InputAudioBufferCommitted
            | ServerEvent::InputAudioBufferCleared
            | ServerEvent::ConversationItemCreated
            | ServerEvent::ResponseCreated
            | ServerEvent::RateLimitsUpdated
            | ServerEvent::ResponseOutputItemAdded
            | ServerEvent::ResponseContentPartAdded
            | ServerEvent::ResponseContentPartDone
            | ServerEvent::ResponseAudioDone
            | ServerEvent::ResponseFunctionCallArgumentsDelta
            | ServerEvent::ResponseFunctionCallArgumentsDone => {}
            ServerEvent::InputAudioTranscriptionCompleted(ev) => self.transcript(&ev).await,
            ServerEvent::InputAudioTranscriptionFailed(ev) => {
                warn!(component = "openai", item_id = %ev.item_id, error = %ev.error.message, "user audio transcription failed");
            }
            ServerEvent::ResponseAudioDelta(ev) => {
                if let Some(cb) = &self.audio {
                    cb(AudioChunk {
                        delta: ev.delta,
                        item_id: ev.item_id,
                    })
                    .await;
                }
            }
            ServerEvent::ResponseAudioTranscriptDelta(ev) => self.transcript(&ev).await,
            ServerEvent::ResponseAudioTranscriptDone(ev) => self.transcript(&ev).await,
            ServerEvent::ResponseOutputItemDone(ev) => match ev.item {
                OutputItem::FunctionCall {
                    name,
                    arguments,
                    call_id,
                    ..
                } => {
                    info!(component = "openai", %name, %call_id, "function call requested");
                    if let Some(cb) = &self.function_call {
                        cb(FunctionCall {
                            name,
                            arguments,
                            call_id,
                        })
                        .await;
                    }
                }
                OutputItem::Other => {}
            },
            ServerEvent::ResponseDone(ev) => {
                if ev.response.status == ResponseStatus::Failed {
                    error!(
                        component = "openai",
                        response_id = ?ev.response.id,
                        details = ?ev.response.status_details,
                        "response failed"
                    );
                }
            }
            ServerEvent::Error(ev) => {
                error!(
                    component = "openai",
                    kind = ?ev.error.kind,
                    code = ?ev.error.code,
                    message = %ev.error.message,
                    "server error"
                );
            }
            ServerEvent::Unknown => {}
        }
    }

    async fn transcript<E: TranscriptEvent>(&self, ev: &E) {
        if ev.transcript().is_empty() {
            return;
        }

        debug!(component = "openai", role = %ev.role(), item_id = %ev.item_id(), "transcript");

        if let Some(cb) = &self.transcript {
            cb(Transcript {
                role: ev.role(),
                text: ev.transcript().to_string(),
                item_id: ev.item_id().to_string(),
            })
            .await;
        }
    }
}

/// Decodes and dispatches one raw text frame. Undecodable frames are logged and skipped.
pub(crate) async fn handle_text(callbacks: &Callbacks, raw: &str) {
    match serde_json::from_str::<ServerEvent>(raw) {
        Ok(ServerEvent::Unknown) => {
            let kind = openai_realtime_types::server::event_type(raw);
            warn!(component = "openai", kind = ?kind, "unhandled message type");
        }
        Ok(event) => callbacks.dispatch(event).await,
        Err(e) => {
            let kind = openai_realtime_types::server::event_type(raw);
            warn!(component = "openai", kind = ?kind, error = %e, "could not decode server event");
        }
    }
}
