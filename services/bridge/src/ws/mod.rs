//! Twilio Media Streams over WebSocket
//!
//! - `session`: accepts a stream and feeds its frames to the executor.
//! - `transport`: the write half handed to the executor for replies and closes.

pub mod session;
mod transport;

pub use session::ws_handler;
pub use transport::WsTransport;
