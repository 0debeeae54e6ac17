//! An in-process backend for running the bridge without an application server.

use anyhow::Result;
use async_trait::async_trait;
use callrelay_core::{AppReply, CommandResult, RpcGateway, executor::CONFIGURATION_EVENT};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, info};

/// Accepts every stream and answers `configure_openai` from local settings.
#[derive(Debug, Default)]
pub struct FakeRpc {
    api_key: Option<SecretString>,
    prompt: Option<String>,
}

impl FakeRpc {
    pub fn new(api_key: Option<SecretString>, prompt: Option<String>) -> Self {
        Self { api_key, prompt }
    }
}

#[async_trait]
impl RpcGateway for FakeRpc {
    async fn authenticated(&self, session_id: &str, identifiers: &str) {
        info!(%session_id, %identifiers, "stream authenticated");
    }

    async fn subscribe(&self, session_id: &str, channel: &str) -> Result<CommandResult> {
        debug!(%session_id, %channel, "subscribed");
        Ok(CommandResult::default())
    }

    async fn perform(
        &self,
        session_id: &str,
        _channel: &str,
        data: &str,
    ) -> Result<CommandResult> {
        let data: Value = serde_json::from_str(data)?;
        let action = data["action"].as_str().unwrap_or_default();

        match action {
            "configure_openai" => {
                let Some(api_key) = &self.api_key else {
                    debug!(%session_id, "no OpenAI key configured, skipping AI");
                    return Ok(CommandResult::default());
                };

                let mut config = json!({ "api_key": api_key.expose_secret() });
                if let Some(prompt) = &self.prompt {
                    config["prompt"] = Value::from(prompt.as_str());
                }

                Ok(CommandResult::with_reply(AppReply {
                    event: CONFIGURATION_EVENT.to_string(),
                    data: config,
                }))
            }
            "handle_transcript" => {
                info!(
                    %session_id,
                    role = %data["role"].as_str().unwrap_or_default(),
                    text = %data["text"].as_str().unwrap_or_default(),
                    "transcript"
                );
                Ok(CommandResult::default())
            }
            _ => {
                debug!(%session_id, %action, "ignoring action");
                Ok(CommandResult::default())
            }
        }
    }

    async fn disconnect(&self, session_id: &str) -> Result<()> {
        debug!(%session_id, "disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_configuration_requires_a_key() {
        let rpc = FakeRpc::default();

        let reply = rpc
            .perform("s1", "{}", r#"{"action":"configure_openai"}"#)
            .await
            .unwrap();

        assert!(reply.reply.is_none());
    }

    #[tokio::test]
    async fn test_configuration_hands_out_key_and_prompt() {
        let rpc = FakeRpc::new(
            Some(SecretString::from("sk-fake".to_string())),
            Some("Be brief.".to_string()),
        );

        let reply = rpc
            .perform("s1", "{}", r#"{"action":"configure_openai"}"#)
            .await
            .unwrap()
            .reply
            .unwrap();

        assert_eq!(reply.event, "openai.configuration");
        assert_eq!(reply.data, json!({"api_key": "sk-fake", "prompt": "Be brief."}));
    }

    #[tokio::test]
    async fn test_other_actions_get_no_reply() {
        let rpc = FakeRpc::new(Some(SecretString::from("sk-fake".to_string())), None);

        for data in [
            r#"{"action":"handle_transcript","role":"user","text":"hi","id":"i1"}"#,
            r#"{"action":"handle_dtmf","digit":"1"}"#,
            r#"{"action":"handle_function_call","name":"f","arguments":"{}"}"#,
        ] {
            assert!(rpc.perform("s1", "{}", data).await.unwrap().reply.is_none());
        }
        assert!(rpc.perform("s1", "{}", "not json").await.is_err());
    }
}
