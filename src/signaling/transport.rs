//! Signaling Transport
//!
//! Out-of-band Kanal für SDP und ICE Candidates zwischen zwei Teilnehmern.
//! `ChannelSignaling` verbindet zwei Sessions im selben Prozess.

use crate::call_engine::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Joining room failed: {0}")]
    JoinFailed(String),

    #[error("Server error: {code} - {message}")]
    ServerError { code: i32, message: String },

    #[error("Signaling channel closed")]
    Closed,
}

// ============================================================================
// MESSAGES
// ============================================================================

/// Nachrichten zwischen den beiden Gesprächsteilnehmern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    Hangup,
}

/// Transport für `SignalMessage`s
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn send(&self, message: SignalMessage) -> Result<(), SignalingError>;

    /// Nächste eingehende Nachricht, `None` sobald der Kanal geschlossen ist
    async fn recv(&self) -> Option<SignalMessage>;
}

// ============================================================================
// IN-PROCESS TRANSPORT
// ============================================================================

/// Signaling über Tokio-Channels
pub struct ChannelSignaling {
    tx: mpsc::UnboundedSender<SignalMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<SignalMessage>>,
}

impl ChannelSignaling {
    /// Erstellt zwei miteinander verbundene Enden
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();

        (
            Self {
                tx: a_tx,
                rx: Mutex::new(a_rx),
            },
            Self {
                tx: b_tx,
                rx: Mutex::new(b_rx),
            },
        )
    }
}

#[async_trait]
impl SignalingTransport for ChannelSignaling {
    async fn send(&self, message: SignalMessage) -> Result<(), SignalingError> {
        self.tx.send(message).map_err(|_| SignalingError::Closed)
    }

    async fn recv(&self) -> Option<SignalMessage> {
        self.rx.lock().await.recv().await
    }
}

impl std::fmt::Debug for ChannelSignaling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSignaling")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_both_directions() {
        let (caller, callee) = ChannelSignaling::pair();

        caller
            .send(SignalMessage::Offer(SessionDescription::offer("v=0")))
            .await
            .unwrap();
        callee.send(SignalMessage::Hangup).await.unwrap();

        assert_eq!(
            callee.recv().await,
            Some(SignalMessage::Offer(SessionDescription::offer("v=0")))
        );
        assert_eq!(caller.recv().await, Some(SignalMessage::Hangup));
    }

    #[tokio::test]
    async fn test_send_fails_after_other_end_dropped() {
        let (caller, callee) = ChannelSignaling::pair();
        drop(callee);

        let result = caller.send(SignalMessage::Hangup).await;
        assert!(matches!(result, Err(SignalingError::Closed)));
        assert_eq!(caller.recv().await, None);
    }
}
