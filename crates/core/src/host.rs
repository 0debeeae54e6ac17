//! Ports the executor talks through: the backend application and the telephony socket.

use crate::frame::OutboundFrame;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// WebSocket close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// The `{event, data}` envelope a backend channel replies with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppReply {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// What the backend produced for one channel command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandResult {
    /// Reply to a performed action, if the channel set one.
    pub reply: Option<AppReply>,
    /// Encoded frames the channel wants delivered to the caller, in order.
    pub transmissions: Vec<String>,
}

impl CommandResult {
    pub fn with_reply(reply: AppReply) -> Self {
        Self {
            reply: Some(reply),
            transmissions: Vec::new(),
        }
    }
}

/// Request/reply channel to the backend application.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RpcGateway: Send + Sync {
    /// Records the identity of an accepted stream. `identifiers` is a JSON object.
    async fn authenticated(&self, session_id: &str, identifiers: &str);

    async fn subscribe(&self, session_id: &str, channel: &str) -> Result<CommandResult>;

    /// Performs a channel action. `data` is a JSON object carrying an `action` field.
    async fn perform(&self, session_id: &str, channel: &str, data: &str) -> Result<CommandResult>;

    async fn disconnect(&self, session_id: &str) -> Result<()>;
}

/// The telephony side of a session.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: &OutboundFrame) -> Result<()>;

    /// Closes the connection. Later sends fail.
    async fn disconnect(&self, reason: &str, code: u16);
}
