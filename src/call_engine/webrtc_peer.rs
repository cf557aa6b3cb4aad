//! WebRTC Peer Connection (webrtc-rs)
//!
//! Implementiert `PeerConnector` / `PeerConnection` mit `RTCPeerConnection`.
//! Lokale Spuren werden als `TrackLocalStaticSample` gesendet, die Plattform
//! schreibt die kodierten Frames über `local_track()` hinein.

use super::peer::{
    IceCandidate, IceServer, NegotiationError, PeerConnection, PeerConnector, PeerEvent,
    PeerState, SdpKind, SessionDescription,
};
use crate::media::{MediaTrack, TrackHandle, TrackKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

const SCREEN_STREAM_ID: &str = "screen";

fn webrtc_error(e: webrtc::Error) -> NegotiationError {
    NegotiationError::Connection(e.to_string())
}

// ============================================================================
// CONNECTOR
// ============================================================================

/// Erstellt `RTCPeerConnection`s mit Default-Codecs (Opus, VP8, ...)
#[derive(Debug, Default, Clone)]
pub struct WebRtcConnector;

impl WebRtcConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        let peer = WebRtcPeer::connect(ice_servers, events).await?;
        Ok(Arc::new(peer))
    }
}

// ============================================================================
// PEER
// ============================================================================

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    /// Lokale Sample-Tracks nach `MediaTrack::id`
    local_tracks: Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>,
    video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
}

impl WebRtcPeer {
    pub async fn connect(
        ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self, NegotiationError> {
        // Media Engine mit Standard-Codecs
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(webrtc_error)?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(webrtc_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(webrtc_error)?,
        );

        Self::setup_handlers(&pc, events);

        Ok(Self {
            pc,
            local_tracks: Mutex::new(HashMap::new()),
            video_sender: Mutex::new(None),
        })
    }

    /// Sample-Track zu einer lokalen Spur, in den die Plattform Frames schreibt
    pub fn local_track(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.local_tracks.lock().get(track_id).cloned()
    }

    fn setup_handlers(pc: &Arc<RTCPeerConnection>, events: mpsc::UnboundedSender<PeerEvent>) {
        // Connection State Handler
        let tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::debug!("RTCPeerConnection state: {}", s);
            let _ = tx.send(PeerEvent::StateChanged(to_peer_state(s)));
            Box::pin(async {})
        }));

        // ICE Candidate Handler
        let tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(init) => {
                        let _ = tx.send(PeerEvent::LocalCandidate(from_candidate_init(init)));
                    }
                    Err(e) => tracing::warn!("Failed to serialize ICE candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        // Remote Spuren
        let tx = events;
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let tx = tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    other => {
                        tracing::warn!("Ignoring remote track of kind {}", other);
                        return;
                    }
                };
                tracing::info!(
                    "Received remote {:?} track {} ({})",
                    kind,
                    track.id(),
                    track.codec().capability.mime_type
                );

                let handle = Arc::new(TrackHandle::new(track.id(), kind));
                let _ = tx.send(PeerEvent::RemoteTrack {
                    stream_id: track.stream_id(),
                    track: Arc::clone(&handle) as Arc<dyn MediaTrack>,
                });

                // RTP lesen bis die Spur endet; Dekodieren übernimmt die Plattform
                tokio::spawn(async move {
                    while handle.is_live() {
                        if track.read_rtp().await.is_err() {
                            break;
                        }
                    }
                    handle.end();
                });
            })
        }));
    }

    fn sample_track_for(&self, track: &dyn MediaTrack, stream_id: &str) -> Arc<TrackLocalStaticSample> {
        let mut tracks = self.local_tracks.lock();
        if let Some(existing) = tracks.get(track.id()) {
            return Arc::clone(existing);
        }

        let mime_type = match track.kind() {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_string(),
                ..Default::default()
            },
            track.id().to_string(),
            stream_id.to_string(),
        ));
        tracks.insert(track.id().to_string(), Arc::clone(&local));
        local
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_track(
        &self,
        track: Arc<dyn MediaTrack>,
        stream_id: &str,
    ) -> Result<(), NegotiationError> {
        let local = self.sample_track_for(track.as_ref(), stream_id);
        let sender = self
            .pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(webrtc_error)?;

        if track.kind() == TrackKind::Video {
            let mut video_sender = self.video_sender.lock();
            if video_sender.is_none() {
                *video_sender = Some(sender);
            }
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self.pc.create_offer(None).await.map_err(webrtc_error)?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self.pc.create_answer(None).await.map_err(webrtc_error)?;
        from_rtc_description(answer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.pc
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(webrtc_error)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.pc
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(|e| NegotiationError::InvalidDescription(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.pc
            .add_ice_candidate(to_candidate_init(candidate))
            .await
            .map_err(webrtc_error)
    }

    async fn replace_video_track(
        &self,
        track: Option<Arc<dyn MediaTrack>>,
    ) -> Result<(), NegotiationError> {
        let sender = self
            .video_sender
            .lock()
            .clone()
            .ok_or_else(|| NegotiationError::Connection("No video sender".to_string()))?;

        let replacement = track.map(|t| {
            self.sample_track_for(t.as_ref(), SCREEN_STREAM_ID) as Arc<dyn TrackLocal + Send + Sync>
        });
        sender.replace_track(replacement).await.map_err(webrtc_error)
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.pc.close().await.map_err(webrtc_error)
    }
}

impl std::fmt::Debug for WebRtcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcPeer")
            .field("state", &self.pc.connection_state())
            .field("local_tracks", &self.local_tracks.lock().len())
            .finish()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

fn to_rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone(),
        credential: server.credential.clone(),
        ..Default::default()
    }
}

fn to_peer_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
        _ => PeerState::New,
    }
}

fn to_rtc_description(
    description: SessionDescription,
) -> Result<RTCSessionDescription, NegotiationError> {
    match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
    }
    .map_err(|e| NegotiationError::InvalidDescription(e.to_string()))
}

fn from_rtc_description(
    description: RTCSessionDescription,
) -> Result<SessionDescription, NegotiationError> {
    match description.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(description.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(description.sdp)),
        other => Err(NegotiationError::InvalidDescription(format!(
            "Unsupported description type: {}",
            other
        ))),
    }
}

fn to_candidate_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_candidate_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

// ============================================================================
// TESTS
// ============================================================================
