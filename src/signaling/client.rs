//! WebSocket Client für den Signaling-Relay
//!
//! Verwaltet die Verbindung zu einem Beratungsraum:
//! - Raum betreten und auf Bestätigung warten
//! - Heartbeat gegen Idle-Timeouts
//! - Nachrichten signieren und senden
//! - Eingehende Nachrichten als `SignalMessage` bereitstellen

use super::messages::*;
use super::transport::{SignalMessage, SignalingError, SignalingTransport};
use crate::call_engine::SessionDescription;
use crate::crypto::KeyPair;
use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Maximale Wartezeit auf `joined`
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Heartbeat-Intervall (unter dem Idle-Timeout des Relays)
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ClientState {
    is_connected: bool,
    remote_peer_id: Option<String>,
}

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

/// WebSocket-Verbindung zu einem Raum des Signaling-Relays
pub struct WebSocketSignaling {
    room_id: String,
    peer_id: String,
    keypair: Arc<KeyPair>,
    state: Arc<RwLock<ClientState>>,
    tx: mpsc::Sender<String>,
    incoming: Mutex<mpsc::Receiver<SignalMessage>>,
    tasks: Vec<JoinHandle<()>>,
}

impl WebSocketSignaling {
    /// Verbindet mit dem Relay und betritt den Raum `room_id`
    pub async fn connect(
        server_url: &str,
        room_id: &str,
        keypair: Arc<KeyPair>,
    ) -> Result<Self, SignalingError> {
        let ws_url = room_url(server_url, room_id)?;
        let peer_id = uuid::Uuid::new_v4().to_string();

        tracing::info!("Connecting to signaling relay: {}", ws_url);

        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<String>(100);
        let (incoming_tx, incoming_rx) = mpsc::channel::<SignalMessage>(100);
        let (joined_tx, joined_rx) = oneshot::channel::<Result<(), SignalingError>>();

        let state = Arc::new(RwLock::new(ClientState {
            is_connected: true,
            remote_peer_id: None,
        }));

        // Read-Task
        let state_clone = Arc::clone(&state);
        let reader = tokio::spawn(async move {
            let mut joined_tx = Some(joined_tx);
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(server_msg) => {
                            let keep_going = Self::handle_server_message(
                                server_msg,
                                &state_clone,
                                &incoming_tx,
                                &mut joined_tx,
                            )
                            .await;
                            if !keep_going {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Ignoring malformed signaling message: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Signaling relay closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            state_clone.write().is_connected = false;
            if let Some(joined_tx) = joined_tx.take() {
                let _ = joined_tx.send(Err(SignalingError::Closed));
            }
            // incoming_tx wird hier gedroppt, recv() liefert danach None
        });

        // Write-Task
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(Message::Text(msg)).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let mut client = Self {
            room_id: room_id.to_string(),
            peer_id,
            keypair,
            state,
            tx,
            incoming: Mutex::new(incoming_rx),
            tasks: vec![reader, writer],
        };

        let join = JoinPayload::new(
            client.room_id.clone(),
            client.peer_id.clone(),
            client.keypair.public_key_base64(),
        );
        client.send_signed(join).await?;

        match tokio::time::timeout(JOIN_TIMEOUT, joined_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(_)) => return Err(SignalingError::JoinFailed("No response".to_string())),
            Err(_) => return Err(SignalingError::JoinFailed("Timeout".to_string())),
        }

        client.start_heartbeat();
        tracing::info!("Joined room {} as {}", client.room_id, client.peer_id);
        Ok(client)
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Peer-ID des anderen Teilnehmers, sobald bekannt
    pub fn remote_peer_id(&self) -> Option<String> {
        self.state.read().remote_peer_id.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    fn start_heartbeat(&mut self) {
        let tx = self.tx.clone();
        let keypair = Arc::clone(&self.keypair);
        let state = Arc::clone(&self.state);
        let payload = RoomPayload::heartbeat(self.room_id.clone(), self.peer_id.clone());

        let heartbeat = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !state.read().is_connected {
                    tracing::info!("Heartbeat: relay disconnected, stopping heartbeat task");
                    break;
                }
                let message = match seal(&keypair, &payload) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!("Failed to sign heartbeat: {}", e);
                        continue;
                    }
                };
                if tx.send(message).await.is_err() {
                    break;
                }
            }
        });
        self.tasks.push(heartbeat);
    }

    async fn send_signed<T: Serialize>(&self, payload: T) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::NotConnected);
        }
        let message = seal(&self.keypair, &payload)?;
        self.tx
            .send(message)
            .await
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    /// Verarbeitet eine Server-Nachricht. `false` beendet den Read-Task.
    async fn handle_server_message(
        msg: ServerMessage,
        state: &Arc<RwLock<ClientState>>,
        incoming: &mpsc::Sender<SignalMessage>,
        joined_tx: &mut Option<oneshot::Sender<Result<(), SignalingError>>>,
    ) -> bool {
        let forwarded = match msg {
            ServerMessage::Joined {
                room_id,
                participants,
                ..
            } => {
                tracing::info!("Room {} has {} participant(s)", room_id, participants);
                if let Some(joined_tx) = joined_tx.take() {
                    let _ = joined_tx.send(Ok(()));
                }
                None
            }

            ServerMessage::PeerJoined { peer_id, .. } => {
                tracing::info!("Peer {} joined the room", peer_id);
                state.write().remote_peer_id = Some(peer_id);
                None
            }

            ServerMessage::PeerLeft { peer_id, .. } => {
                tracing::info!("Peer {} left the room", peer_id);
                let mut s = state.write();
                if s.remote_peer_id.as_deref() == Some(peer_id.as_str()) {
                    s.remote_peer_id = None;
                }
                None
            }

            ServerMessage::Offer {
                from_peer_id, sdp, ..
            } => {
                state.write().remote_peer_id = Some(from_peer_id);
                Some(SignalMessage::Offer(SessionDescription::offer(sdp)))
            }

            ServerMessage::Answer {
                from_peer_id, sdp, ..
            } => {
                state.write().remote_peer_id = Some(from_peer_id);
                Some(SignalMessage::Answer(SessionDescription::answer(sdp)))
            }

            ServerMessage::IceCandidate {
                from_peer_id,
                candidate,
                ..
            } => {
                tracing::debug!("ICE candidate from {}", from_peer_id);
                Some(SignalMessage::IceCandidate(candidate))
            }

            ServerMessage::Hangup { from_peer_id, .. } => {
                tracing::info!("Peer {} hung up", from_peer_id);
                Some(SignalMessage::Hangup)
            }

            ServerMessage::Error { code, message, .. } => {
                tracing::error!("Signaling relay error {}: {}", code, message);
                if let Some(joined_tx) = joined_tx.take() {
                    let _ = joined_tx.send(Err(SignalingError::ServerError { code, message }));
                }
                None
            }

            ServerMessage::Pong { .. } => None,
        };

        match forwarded {
            Some(message) => incoming.send(message).await.is_ok(),
            None => true,
        }
    }
}

#[async_trait]
impl SignalingTransport for WebSocketSignaling {
    async fn send(&self, message: SignalMessage) -> Result<(), SignalingError> {
        let room_id = self.room_id.clone();
        let peer_id = self.peer_id.clone();

        match message {
            SignalMessage::Offer(description) => {
                self.send_signed(DescriptionPayload::offer(room_id, peer_id, description.sdp))
                    .await
            }
            SignalMessage::Answer(description) => {
                self.send_signed(DescriptionPayload::answer(room_id, peer_id, description.sdp))
                    .await
            }
            SignalMessage::IceCandidate(candidate) => {
                self.send_signed(IceCandidatePayload::new(room_id, peer_id, candidate))
                    .await
            }
            SignalMessage::Hangup => self.send_signed(RoomPayload::hangup(room_id, peer_id)).await,
        }
    }

    async fn recv(&self) -> Option<SignalMessage> {
        self.incoming.lock().await.recv().await
    }
}

impl Drop for WebSocketSignaling {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for WebSocketSignaling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSignaling")
            .field("room_id", &self.room_id)
            .field("peer_id", &self.peer_id)
            .field("state", &*self.state.read())
            .finish()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// `https://relay.example/` + Raum → `wss://relay.example/rooms/<raum>/ws`
fn room_url(server_url: &str, room_id: &str) -> Result<Url, SignalingError> {
    let mut url =
        Url::parse(server_url).map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SignalingError::ConnectionFailed(format!(
                "Unsupported URL scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SignalingError::ConnectionFailed("Cannot switch URL scheme".to_string()))?;

    url.path_segments_mut()
        .map_err(|_| SignalingError::ConnectionFailed("URL cannot be a base".to_string()))?
        .pop_if_empty()
        .extend(["rooms", room_id, "ws"]);

    Ok(url)
}

fn seal<T: Serialize>(keypair: &KeyPair, payload: &T) -> Result<String, SignalingError> {
    let message = keypair
        .seal(payload, Utc::now().timestamp_millis())
        .map_err(|e| SignalingError::SendFailed(e.to_string()))?;
    serde_json::to_string(&message).map_err(|e| SignalingError::SendFailed(e.to_string()))
}

// ============================================================================
// TESTS
// ============================================================================
