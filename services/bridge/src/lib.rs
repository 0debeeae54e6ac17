//! Call Relay Server Library Crate
//!
//! Hosts Twilio media streams over WebSocket and bridges each call to an OpenAI
//! Realtime agent through the executor in `callrelay-core`. The `bridge` binary is
//! a thin wrapper around this library.

pub mod config;
pub mod router;
pub mod rpc;
pub mod state;
pub mod ws;
