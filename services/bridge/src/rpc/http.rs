//! RPC over HTTP to the backend application.
//!
//! Every call is a JSON POST. Commands go to `<base>/command` and carry the channel
//! identifier, the connection identifiers reported at authentication, and the
//! command payload. The application replies with a status, frames to transmit to
//! the caller, and the channel's internal state; an action reply lives in
//! `istate.anycable_response`. The rest of that state is sent back as `env.istate`
//! on every later command for the same channel.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use callrelay_core::{AppReply, CommandResult, RpcGateway};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tracing::{debug, instrument};

const REPLY_STATE_KEY: &str = "anycable_response";

#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    command: &'a str,
    identifier: &'a str,
    connection_identifiers: &'a str,
    data: &'a str,
    env: CommandEnv<'a>,
}

#[derive(Debug, Serialize)]
struct CommandEnv<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    istate: Option<&'a ChannelState>,
}

type ChannelState = HashMap<String, String>;

#[derive(Debug, Deserialize)]
struct CommandResponse {
    status: String,
    #[serde(default)]
    error_msg: String,
    #[serde(default)]
    transmissions: Option<Vec<String>>,
    #[serde(default)]
    istate: Option<ChannelState>,
}

#[derive(Debug, Serialize)]
struct DisconnectRequest<'a> {
    connection_identifiers: &'a str,
    subscriptions: &'a [String],
}

#[derive(Debug, Default)]
struct Connection {
    identifiers: String,
    subscriptions: Vec<String>,
    /// Channel state keyed by channel identifier.
    states: HashMap<String, ChannelState>,
}

pub struct HttpRpc {
    client: reqwest::Client,
    base_url: String,
    connections: Mutex<HashMap<String, Connection>>,
}

impl HttpRpc {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build RPC HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            connections: Mutex::new(HashMap::new()),
        })
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn identifiers(&self, session_id: &str) -> String {
        self.connections()
            .get(session_id)
            .map(|c| c.identifiers.clone())
            .unwrap_or_default()
    }

    fn channel_state(&self, session_id: &str, channel: &str) -> Option<ChannelState> {
        self.connections()
            .get(session_id)
            .and_then(|c| c.states.get(channel))
            .cloned()
    }

    /// Merges the returned channel state, leaving out the one-shot reply.
    fn store_channel_state(&self, session_id: &str, channel: &str, istate: &ChannelState) {
        let mut connections = self.connections();
        let state = connections
            .entry(session_id.to_string())
            .or_default()
            .states
            .entry(channel.to_string())
            .or_default();

        for (key, value) in istate {
            if key != REPLY_STATE_KEY {
                state.insert(key.clone(), value.clone());
            }
        }
    }

    async fn command(
        &self,
        session_id: &str,
        command: &str,
        identifier: &str,
        data: &str,
    ) -> Result<CommandResponse> {
        let identifiers = self.identifiers(session_id);
        let istate = self.channel_state(session_id, identifier);
        let request = CommandRequest {
            command,
            identifier,
            connection_identifiers: &identifiers,
            data,
            env: CommandEnv {
                istate: istate.as_ref(),
            },
        };

        let response: CommandResponse = self
            .client
            .post(format!("{}/command", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse RPC command response")?;

        if response.status != "SUCCESS" {
            bail!(
                "{command} command returned {}: {}",
                response.status,
                response.error_msg
            );
        }

        if let Some(istate) = &response.istate {
            self.store_channel_state(session_id, identifier, istate);
        }

        Ok(response)
    }
}

#[async_trait]
impl RpcGateway for HttpRpc {
    async fn authenticated(&self, session_id: &str, identifiers: &str) {
        self.connections()
            .entry(session_id.to_string())
            .or_default()
            .identifiers = identifiers.to_string();
    }

    #[instrument(skip(self))]
    async fn subscribe(&self, session_id: &str, channel: &str) -> Result<CommandResult> {
        let response = self.command(session_id, "subscribe", channel, "").await?;

        self.connections()
            .entry(session_id.to_string())
            .or_default()
            .subscriptions
            .push(channel.to_string());

        Ok(CommandResult {
            reply: None,
            transmissions: response.transmissions.unwrap_or_default(),
        })
    }

    #[instrument(skip(self, channel))]
    async fn perform(
        &self,
        session_id: &str,
        channel: &str,
        data: &str,
    ) -> Result<CommandResult> {
        let response = self.command(session_id, "message", channel, data).await?;

        let reply = match response
            .istate
            .as_ref()
            .and_then(|state| state.get(REPLY_STATE_KEY))
            .filter(|raw| !raw.is_empty())
        {
            Some(raw) => {
                let reply: AppReply =
                    serde_json::from_str(raw).context("Failed to parse RPC response")?;
                debug!(?reply, "rpc reply");
                Some(reply)
            }
            None => None,
        };

        Ok(CommandResult {
            reply,
            transmissions: response.transmissions.unwrap_or_default(),
        })
    }

    #[instrument(skip(self))]
    async fn disconnect(&self, session_id: &str) -> Result<()> {
        let connection = self.connections().remove(session_id).unwrap_or_default();
        let request = DisconnectRequest {
            connection_identifiers: &connection.identifiers,
            subscriptions: &connection.subscriptions,
        };

        self.client
            .post(format!("{}/disconnect", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
