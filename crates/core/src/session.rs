use crate::host::Transport;
use openai_realtime::RealtimeAgent;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connected,
    Streaming,
    Terminated,
}

/// Typed per-call state.
#[derive(Debug, Default)]
pub struct SessionContext {
    pub call_sid: Option<String>,
    pub stream_sid: Option<String>,
    pub agent: Option<Arc<RealtimeAgent>>,
}

/// One accepted telephony connection.
pub struct Session {
    id: String,
    pub(crate) state: SessionState,
    pub(crate) authenticated: bool,
    pub context: SessionContext,
    pub(crate) transport: Arc<dyn Transport>,
}

impl Session {
    pub fn new(id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Idle,
            authenticated: false,
            context: SessionContext::default(),
            transport,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("authenticated", &self.authenticated)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
