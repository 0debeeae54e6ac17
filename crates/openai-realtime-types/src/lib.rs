//! Wire types for the OpenAI Realtime API.
//!
//! `client` holds the events this crate's users send to the server, `server` the
//! events the server streams back. Both are closed tagged enums keyed by the
//! `type` field so every message is decoded exactly once.
//!
//! See https://platform.openai.com/docs/api-reference/realtime

pub mod client;
pub mod server;

pub use client::{AudioFormat, ClientEvent, InputAudioTranscription, Item, SessionConfig};
pub use server::{ServerEvent, TranscriptEvent};

use serde::{Deserialize, Serialize};

/// The speaker a transcript belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
