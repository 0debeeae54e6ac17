//! Backends the executor can talk to.

mod fake;
mod http;

pub use fake::FakeRpc;
pub use http::HttpRpc;

use crate::config::Config;
use anyhow::{Context, Result};
use callrelay_core::RpcGateway;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::info;

/// Builds the gateway selected by the configuration.
pub fn from_config(config: &Config) -> Result<Arc<dyn RpcGateway>> {
    if config.fake_rpc {
        info!("Using the in-process fake RPC backend.");
        let api_key = config
            .openai_api_key
            .as_ref()
            .map(|key| SecretString::from(key.expose_secret().to_string()));
        return Ok(Arc::new(FakeRpc::new(api_key, config.openai_prompt.clone())));
    }

    let url = config
        .rpc_url
        .as_deref()
        .context("RPC_URL is required without FAKE_RPC")?;
    info!(rpc_url = %url, "Using the HTTP RPC backend.");
    Ok(Arc::new(HttpRpc::new(url, config.rpc_timeout)?))
}
