//! Message Types für das Signaling-Protokoll
//!
//! Jede Beratung hat einen eigenen Raum (Raum-ID = Termin-ID). Der Relay
//! leitet Nachrichten an den jeweils anderen Teilnehmer im Raum weiter.

use crate::call_engine::IceCandidate;
use serde::{Deserialize, Serialize};

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Raum betreten
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub room_id: String,
    pub peer_id: String,
    pub public_key: String,
}

impl JoinPayload {
    pub fn new(room_id: String, peer_id: String, public_key: String) -> Self {
        Self {
            msg_type: "join",
            room_id,
            peer_id,
            public_key,
        }
    }
}

/// SDP Offer oder Answer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub room_id: String,
    pub from_peer_id: String,
    pub sdp: String,
}

impl DescriptionPayload {
    pub fn offer(room_id: String, from_peer_id: String, sdp: String) -> Self {
        Self {
            msg_type: "offer",
            room_id,
            from_peer_id,
            sdp,
        }
    }

    pub fn answer(room_id: String, from_peer_id: String, sdp: String) -> Self {
        Self {
            msg_type: "answer",
            room_id,
            from_peer_id,
            sdp,
        }
    }
}

/// ICE Candidate senden
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidatePayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub room_id: String,
    pub from_peer_id: String,
    pub candidate: IceCandidate,
}

impl IceCandidatePayload {
    pub fn new(room_id: String, from_peer_id: String, candidate: IceCandidate) -> Self {
        Self {
            msg_type: "ice_candidate",
            room_id,
            from_peer_id,
            candidate,
        }
    }
}

/// Auflegen, Heartbeat und Verlassen haben keinen weiteren Inhalt
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub room_id: String,
    pub from_peer_id: String,
}

impl RoomPayload {
    pub fn hangup(room_id: String, from_peer_id: String) -> Self {
        Self {
            msg_type: "hangup",
            room_id,
            from_peer_id,
        }
    }

    pub fn heartbeat(room_id: String, from_peer_id: String) -> Self {
        Self {
            msg_type: "heartbeat",
            room_id,
            from_peer_id,
        }
    }
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Raum erfolgreich betreten
    Joined {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "peerId")]
        peer_id: String,
        #[serde(default)]
        participants: u32,
        timestamp: i64,
    },

    PeerJoined {
        #[serde(rename = "peerId")]
        peer_id: String,
        timestamp: i64,
    },

    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: String,
        timestamp: i64,
    },

    Offer {
        #[serde(rename = "fromPeerId")]
        from_peer_id: String,
        sdp: String,
        timestamp: i64,
    },

    Answer {
        #[serde(rename = "fromPeerId")]
        from_peer_id: String,
        sdp: String,
        timestamp: i64,
    },

    IceCandidate {
        #[serde(rename = "fromPeerId")]
        from_peer_id: String,
        candidate: IceCandidate,
        timestamp: i64,
    },

    Hangup {
        #[serde(rename = "fromPeerId")]
        from_peer_id: String,
        timestamp: i64,
    },

    Error {
        code: i32,
        message: String,
        timestamp: i64,
    },

    /// Heartbeat Antwort
    Pong { timestamp: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_payload_serialization() {
        let payload = DescriptionPayload::offer(
            "room-1".to_string(),
            "peer-a".to_string(),
            "v=0".to_string(),
        );

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["roomId"], "room-1");
        assert_eq!(json["fromPeerId"], "peer-a");
        assert_eq!(json["sdp"], "v=0");
    }

    #[test]
    fn test_candidate_payload_nests_candidate_object() {
        let payload = IceCandidatePayload::new(
            "room-1".to_string(),
            "peer-a".to_string(),
            IceCandidate {
                candidate: "candidate:1".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            },
        );

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "ice_candidate");
        assert_eq!(json["candidate"]["candidate"], "candidate:1");
        assert_eq!(json["candidate"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_server_message_parsing() {
        let joined: ServerMessage = serde_json::from_str(
            r#"{"type":"joined","roomId":"room-1","peerId":"peer-a","participants":2,"timestamp":1}"#,
        )
        .unwrap();
        assert!(matches!(
            joined,
            ServerMessage::Joined { participants: 2, .. }
        ));

        let candidate: ServerMessage = serde_json::from_str(
            r#"{"type":"ice_candidate","fromPeerId":"peer-b","candidate":{"candidate":"candidate:2","sdpMid":"0"},"timestamp":2}"#,
        )
        .unwrap();
        match candidate {
            ServerMessage::IceCandidate { candidate, .. } => {
                assert_eq!(candidate.candidate, "candidate:2");
                assert_eq!(candidate.sdp_mline_index, None);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let error: ServerMessage = serde_json::from_str(
            r#"{"type":"error","code":404,"message":"room not found","timestamp":3}"#,
        )
        .unwrap();
        assert!(matches!(error, ServerMessage::Error { code: 404, .. }));
    }
}
