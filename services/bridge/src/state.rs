//! Shared Application State

use crate::config::Config;
use callrelay_core::Executor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,
    pub config: Arc<Config>,
    /// Cancelled on shutdown; every agent connection is a child of it.
    pub shutdown: CancellationToken,
}
