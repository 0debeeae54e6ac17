//! Server-to-client events.

use crate::Role;
use serde::Deserialize;
use serde_json::Value;

/// Events streamed by the realtime server.
///
/// Events the bridge only observes are unit variants; their payloads are skipped.
/// Anything not listed decodes as [`ServerEvent::Unknown`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.updated")]
    SessionUpdated,
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped,
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted,
    #[serde(rename = "input_audio_buffer.cleared")]
    InputAudioBufferCleared,
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated,
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted(InputAudioTranscriptionCompleted),
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputAudioTranscriptionFailed(InputAudioTranscriptionFailed),
    #[serde(rename = "response.created")]
    ResponseCreated,
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated,
    #[serde(rename = "response.output_item.added")]
    ResponseOutputItemAdded,
    #[serde(rename = "response.content_part.added")]
    ResponseContentPartAdded,
    #[serde(rename = "response.content_part.done")]
    ResponseContentPartDone,
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta(ResponseAudioDelta),
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone,
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta(ResponseAudioTranscriptDelta),
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone(ResponseAudioTranscriptDone),
    #[serde(rename = "response.function_call_arguments.delta")]
    ResponseFunctionCallArgumentsDelta,
    #[serde(rename = "response.function_call_arguments.done")]
    ResponseFunctionCallArgumentsDone,
    #[serde(rename = "response.output_item.done")]
    ResponseOutputItemDone(ResponseOutputItemDone),
    #[serde(rename = "response.done")]
    ResponseDone(ResponseDone),
    #[serde(rename = "error")]
    Error(ErrorEvent),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InputAudioTranscriptionCompleted {
    #[serde(default)]
    pub event_id: String,
    pub item_id: String,
    #[serde(default)]
    pub content_index: u32,
    #[serde(default)]
    pub transcript: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InputAudioTranscriptionFailed {
    pub item_id: String,
    pub error: ApiError,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseAudioDelta {
    #[serde(default)]
    pub response_id: String,
    pub item_id: String,
    #[serde(default)]
    pub output_index: u32,
    #[serde(default)]
    pub content_index: u32,
    /// Base64 encoded audio chunk.
    #[serde(default)]
    pub delta: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseAudioTranscriptDelta {
    #[serde(default)]
    pub response_id: String,
    pub item_id: String,
    #[serde(default)]
    pub delta: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseAudioTranscriptDone {
    #[serde(default)]
    pub response_id: String,
    pub item_id: String,
    #[serde(default)]
    pub transcript: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseOutputItemDone {
    #[serde(default)]
    pub response_id: String,
    #[serde(default)]
    pub output_index: u32,
    pub item: OutputItem,
}

/// An output item of a response. Only function calls are acted upon.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum OutputItem {
    #[serde(rename = "function_call")]
    FunctionCall {
        #[serde(default)]
        id: Option<String>,
        name: String,
        /// JSON encoded arguments, exactly as produced by the model.
        arguments: String,
        call_id: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseDone {
    pub response: ResponseResource,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseResource {
    #[serde(default)]
    pub id: Option<String>,
    pub status: ResponseStatus,
    #[serde(default)]
    pub status_details: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    InProgress,
    Completed,
    Cancelled,
    Failed,
    Incomplete,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    pub event_id: Option<String>,
    pub error: ApiError,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub param: Option<String>,
}

/// A transcript fragment, shared by user and assistant transcription events.
pub trait TranscriptEvent {
    fn role(&self) -> Role;
    fn item_id(&self) -> &str;
    fn transcript(&self) -> &str;
}

impl TranscriptEvent for InputAudioTranscriptionCompleted {
    fn role(&self) -> Role {
        Role::User
    }

    fn item_id(&self) -> &str {
        &self.item_id
    }

    fn transcript(&self) -> &str {
        &self.transcript
    }
}

impl TranscriptEvent for ResponseAudioTranscriptDelta {
    fn role(&self) -> Role {
        Role::Assistant
    }

    fn item_id(&self) -> &str {
        &self.item_id
    }

    fn transcript(&self) -> &str {
        &self.delta
    }
}

impl TranscriptEvent for ResponseAudioTranscriptDone {
    fn role(&self) -> Role {
        Role::Assistant
    }

    fn item_id(&self) -> &str {
        &self.item_id
    }

    fn transcript(&self) -> &str {
        &self.transcript
    }
}

/// Extracts the `type` discriminator without decoding the payload.
///
/// Used to name events that decode as [`ServerEvent::Unknown`] or fail to decode.
pub fn event_type(raw: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Tagged {
        #[serde(rename = "type")]
        kind: String,
    }

    serde_json::from_str::<Tagged>(raw).ok().map(|t| t.kind)
}
