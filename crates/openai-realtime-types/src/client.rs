//! Client-to-server events.

use serde::Serialize;
use serde_json::Value;

/// Audio codecs accepted by the realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Pcm16,
    G711Ulaw,
    G711Alaw,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputAudioTranscription {
    pub model: String,
}

/// Session parameters sent with `session.update`.
///
/// Unset optional fields are omitted so the server keeps its defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionConfig {
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub input_audio_transcription: InputAudioTranscription,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Tool schema passed through as-is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
}

/// A conversation item created by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Item {
    /// The result of a function call requested by the model.
    FunctionCallOutput { call_id: String, output: String },
}

/// Events sent from the client to the realtime server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    /// Appends base64 encoded audio to the input buffer.
    ///
    /// The payload can be large; avoid logging this variant with `Debug`.
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: Item },
    /// Asks the model to produce a response.
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientEvent {
    /// The `type` discriminator of the event, handy for structured logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate => "response.create",
        }
    }
}
