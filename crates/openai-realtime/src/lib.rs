//! A per-call agent speaking the OpenAI Realtime WebSocket protocol.
//!
//! The [`RealtimeAgent`] owns one AI-side connection. Telephony audio is pushed in with
//! [`RealtimeAgent::enqueue_audio`], batched by an [`AudioBuffer`], and written by a
//! dedicated writer task in strict FIFO order. A reader task decodes server events and
//! hands transcripts, audio and function calls to the callbacks registered before
//! [`RealtimeAgent::start`].

mod agent;
mod buffer;
mod config;
mod error;
mod handler;

pub use agent::{AgentState, OUTBOUND_QUEUE_CAPACITY, Outbound, RealtimeAgent};
pub use buffer::{AudioBuffer, BYTES_PER_FLUSH, BYTES_PER_PACKET, PACKETS_PER_FLUSH};
pub use config::{AgentConfig, DEFAULT_MODEL, DEFAULT_URL, DEFAULT_VOICE, TRANSCRIPTION_MODEL};
pub use error::AgentError;
pub use handler::{
    AudioCallback, AudioChunk, Callbacks, FunctionCall, FunctionCallCallback, Transcript,
    TranscriptCallback,
};
pub use openai_realtime_types as types;
