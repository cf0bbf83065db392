//! Connection to the generative model
//!
//! `client` carries the duplex websocket session, `generate` the one-shot
//! REST call used by the turn-based assistant.

pub mod client;
pub mod generate;
pub mod messages;

pub use client::{
    Connector, DEFAULT_LIVE_ENDPOINT, GeminiConnector, LiveReceiver, LiveSender, LiveSink,
    LiveSource, handshake,
};
pub use generate::{GeminiTextClient, TextGenerator};
pub use messages::{ServerEvent, parse_server_message};
