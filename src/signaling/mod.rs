//! Signaling Module - Austausch von SDP und ICE Candidates
//!
//! - `SignalingTransport`: Schnittstelle die die Call-Session verwendet
//! - `ChannelSignaling`: Transport innerhalb eines Prozesses
//! - `WebSocketSignaling`: signierte Nachrichten über einen Relay-Raum
//!

mod client;
mod messages;
mod transport;

pub use client::WebSocketSignaling;
pub use messages::*;
pub use transport::{ChannelSignaling, SignalMessage, SignalingError, SignalingTransport};
