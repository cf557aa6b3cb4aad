//! Call Engine Module - Video-Beratung über WebRTC
//!
//! Dieses Modul verwaltet:
//! - Die Call-Session (Medien, Aushandlung, Bildschirmfreigabe, Beenden)
//! - Die Abstraktion der Peer Connection
//! - Die webrtc-rs Implementierung dazu

mod peer;
mod session;
mod webrtc_peer;

#[cfg(test)]
pub(crate) mod fakes;

pub use peer::*;
pub use session::*;
pub use webrtc_peer::{WebRtcConnector, WebRtcPeer};
