//! Peer Connection Abstraktion
//!
//! Trennt die Call-Session von der konkreten WebRTC-Implementierung.
//! Die Session spricht nur mit `PeerConnector` / `PeerConnection`,
//! Callbacks der Verbindung kommen als `PeerEvent` über einen Channel.

use crate::media::MediaTrack;
use crate::signaling::SignalingError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum NegotiationError {
    #[error("Peer connection error: {0}")]
    Connection(String),

    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("Signaling failed: {0}")]
    Signaling(#[from] SignalingError),

    #[error("No remote description received within {0:?}")]
    Timeout(Duration),

    #[error("Negotiation aborted because the session was closed")]
    Aborted,
}

// ============================================================================
// NEGOTIATION PRIMITIVES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// SDP Offer oder Answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE Candidate im JSON-Format des Browsers (`RTCIceCandidateInit`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// STUN/TURN Server
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }
}

/// Standard-Konfiguration: öffentlicher Google STUN Server
pub fn default_ice_servers() -> Vec<IceServer> {
    vec![IceServer::stun("stun:stun.l.google.com:19302")]
}

// ============================================================================
// EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Callbacks der Peer Connection, als Nachrichten zugestellt
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Eine Remote-Spur ist angekommen
    RemoteTrack {
        stream_id: String,
        track: Arc<dyn MediaTrack>,
    },
    /// Lokaler ICE Candidate gefunden
    LocalCandidate(IceCandidate),
    StateChanged(PeerState),
}

// ============================================================================
// CONNECTION TRAITS
// ============================================================================

/// Erstellt Peer Connections
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Baut eine neue Verbindung auf. Alle Callbacks landen in `events`.
    async fn connect(
        &self,
        ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError>;
}

/// Eine ausgehandelte (oder in Aushandlung befindliche) Peer Connection
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Hängt eine lokale Spur an. Die erste Video-Spur bestimmt den Video-Sender.
    async fn add_track(
        &self,
        track: Arc<dyn MediaTrack>,
        stream_id: &str,
    ) -> Result<(), NegotiationError>;

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    /// Ersetzt die Spur des Video-Senders ohne Neuverhandlung.
    /// `None` lässt den Sender leer laufen.
    async fn replace_video_track(
        &self,
        track: Option<Arc<dyn MediaTrack>>,
    ) -> Result<(), NegotiationError>;

    async fn close(&self) -> Result<(), NegotiationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_uses_browser_field_names() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 51234 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };

        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
        assert!(json.get("usernameFragment").is_none());
    }

    #[test]
    fn test_description_type_tag() {
        let json = serde_json::to_string(&SessionDescription::answer("v=0")).unwrap();
        assert_eq!(json, r#"{"type":"answer","sdp":"v=0"}"#);
    }
}
