//! Session executor for Twilio Media Streams calls bridged to an OpenAI Realtime agent.
//!
//! The host decodes each inbound frame with [`frame::decode`] and hands it to
//! [`Executor::handle_command`]. The executor talks to the backend application through
//! the [`RpcGateway`] port and writes back to the caller through the [`Transport`] port.

pub mod error;
pub mod executor;
pub mod frame;
pub mod host;
pub mod session;

pub use error::ExecutorError;
pub use executor::{Executor, TwilioConfig};
pub use frame::{Frame, FrameError, OutboundFrame};
pub use host::{AppReply, CommandResult, RpcGateway, Transport};
pub use session::{Session, SessionContext, SessionState};
