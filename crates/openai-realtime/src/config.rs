use openai_realtime_types::{AudioFormat, InputAudioTranscription, SessionConfig};
use secrecy::SecretString;
use serde_json::Value;

pub const DEFAULT_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";
pub const DEFAULT_VOICE: &str = "alloy";
pub const TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Connection and session settings for a single agent.
#[derive(Debug)]
pub struct AgentConfig {
    pub url: String,
    pub api_key: SecretString,
    pub model: String,
    pub voice: String,
    pub prompt: Option<String>,
    /// Tool schema forwarded to the model untouched.
    pub tools: Option<Value>,
}

impl AgentConfig {
    /// Creates a configuration with the default endpoint, model and voice.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            api_key: SecretString::from(api_key.into()),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            prompt: None,
            tools: None,
        }
    }

    /// The dial URL, with the model as a query parameter.
    pub fn endpoint(&self) -> String {
        format!("{}?model={}", self.url, self.model)
    }

    /// Session parameters for the telephony leg: µ-law both ways, whisper transcription.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            input_audio_format: AudioFormat::G711Ulaw,
            output_audio_format: AudioFormat::G711Ulaw,
            input_audio_transcription: InputAudioTranscription {
                model: TRANSCRIPTION_MODEL.to_string(),
            },
            voice: Some(self.voice.clone()),
            instructions: self.prompt.clone(),
            tools: self.tools.clone(),
        }
    }
}
