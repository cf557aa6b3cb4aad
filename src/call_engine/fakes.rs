//! Test-Doubles für Medien-Plattform und Peer Connection

use super::peer::{
    IceCandidate, IceServer, NegotiationError, PeerConnection, PeerConnector, PeerEvent,
    SessionDescription,
};
use crate::media::{
    MediaAccessError, MediaConstraints, MediaDevices, MediaStream, MediaTrack, ScreenCaptureError,
    TrackHandle, TrackKind,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Pollt `condition` bis sie erfüllt ist (max. 2 Sekunden)
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// DEVICES
// ============================================================================

/// Kamera liefert `camera-N` mit `mic-N` + `cam-N`, Bildschirm liefert `screen-N`
#[derive(Default)]
pub struct FakeDevices {
    camera_error: Mutex<Option<MediaAccessError>>,
    screen_error: Mutex<Option<ScreenCaptureError>>,
    cameras: AtomicUsize,
    screens: Mutex<Vec<Arc<TrackHandle>>>,
}

impl FakeDevices {
    pub fn denying_camera(error: MediaAccessError) -> Self {
        let devices = Self::default();
        *devices.camera_error.lock() = Some(error);
        devices
    }

    pub fn deny_screen(&self, error: ScreenCaptureError) {
        *self.screen_error.lock() = Some(error);
    }

    /// Die Video-Spur der `index`-ten Bildschirmfreigabe
    pub fn screen_track(&self, index: usize) -> Option<Arc<TrackHandle>> {
        self.screens.lock().get(index).cloned()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<MediaStream, MediaAccessError> {
        if let Some(error) = self.camera_error.lock().clone() {
            return Err(error);
        }

        let n = self.cameras.fetch_add(1, Ordering::SeqCst) + 1;
        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(TrackHandle::new(format!("mic-{}", n), TrackKind::Audio)));
        }
        if constraints.video {
            tracks.push(Arc::new(TrackHandle::new(format!("cam-{}", n), TrackKind::Video)));
        }
        Ok(MediaStream::new(format!("camera-{}", n), tracks))
    }

    async fn display_media(&self) -> Result<MediaStream, ScreenCaptureError> {
        if let Some(error) = self.screen_error.lock().clone() {
            return Err(error);
        }

        let mut screens = self.screens.lock();
        let id = format!("screen-{}", screens.len() + 1);
        let track = Arc::new(TrackHandle::new(id.clone(), TrackKind::Video));
        screens.push(Arc::clone(&track));
        Ok(MediaStream::new(id, vec![track as Arc<dyn MediaTrack>]))
    }
}

// ============================================================================
// PEER CONNECTION
// ============================================================================

#[derive(Default)]
pub struct FakeConnector {
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakeConnector {
    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().clone()
    }

    pub fn last_peer(&self) -> Option<Arc<FakePeer>> {
        self.peers.lock().last().cloned()
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        _ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        let peer = Arc::new(FakePeer::new(events));
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer)
    }
}

/// Zeichnet alle Aufrufe auf. `set_local_description` meldet einen lokalen Candidate.
pub struct FakePeer {
    events: mpsc::UnboundedSender<PeerEvent>,
    tracks: Mutex<Vec<String>>,
    /// `None` solange kein Video-Sender existiert, sonst die gesendete Spur
    video_sender: Mutex<Option<Option<String>>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    closed: AtomicBool,
}

impl FakePeer {
    fn new(events: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self {
            events,
            tracks: Mutex::new(Vec::new()),
            video_sender: Mutex::new(None),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Simuliert einen Callback der Verbindung
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    pub fn attached_tracks(&self) -> Vec<String> {
        self.tracks.lock().clone()
    }

    pub fn video_sender_track(&self) -> Option<String> {
        self.video_sender.lock().clone().flatten()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn remote_candidates(&self) -> Vec<String> {
        self.candidates
            .lock()
            .iter()
            .map(|c| c.candidate.clone())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.is_closed() {
            Err(NegotiationError::Connection("connection closed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_track(
        &self,
        track: Arc<dyn MediaTrack>,
        _stream_id: &str,
    ) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        self.tracks.lock().push(track.id().to_string());
        if track.kind() == TrackKind::Video {
            let mut sender = self.video_sender.lock();
            if sender.is_none() {
                *sender = Some(Some(track.id().to_string()));
            }
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        Ok(SessionDescription::offer("v=0 fake-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        if self.remote.lock().is_none() {
            return Err(NegotiationError::InvalidDescription(
                "answer requires a remote offer".to_string(),
            ));
        }
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        *self.local.lock() = Some(description);
        self.emit(PeerEvent::LocalCandidate(IceCandidate {
            candidate: "candidate:fake-local".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        *self.remote.lock() = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        if self.remote.lock().is_none() {
            return Err(NegotiationError::InvalidDescription(
                "candidate before remote description".to_string(),
            ));
        }
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn replace_video_track(
        &self,
        track: Option<Arc<dyn MediaTrack>>,
    ) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        let mut sender = self.video_sender.lock();
        let Some(current) = sender.as_mut() else {
            return Err(NegotiationError::Connection("No video sender".to_string()));
        };
        *current = track.map(|t| t.id().to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
