//! Call Session
//!
//! Verwaltet genau eine Audio/Video-Sitzung zwischen Mandant und Anwalt:
//! lokale Medien öffnen, Verbindung aushandeln, Spuren stumm schalten,
//! Kamera gegen Bildschirmfreigabe tauschen und alles wieder freigeben.
//!
//! Zustände: `Idle → Negotiating → Active → Ended`. `Ended` ist endgültig.
//! Callbacks der Peer Connection und des Signalings werden als Nachrichten
//! in Hintergrund-Tasks verarbeitet, die nur eine `Weak`-Referenz halten.

use super::peer::{
    default_ice_servers, IceCandidate, IceServer, NegotiationError, PeerConnection, PeerConnector,
    PeerEvent, PeerState, SdpKind, SessionDescription,
};
use crate::media::{
    MediaAccessError, MediaConstraints, MediaDevices, MediaStream, MediaTrack, ScreenCaptureError,
    TrackKind,
};
use crate::signaling::{SignalMessage, SignalingError, SignalingTransport};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Wie lange auf Offer bzw. Answer der Gegenseite gewartet wird
pub const DEFAULT_ANSWER_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum CallSessionError {
    #[error("Media access failed: {0}")]
    MediaAccess(#[from] MediaAccessError),

    #[error("Screen share failed: {0}")]
    ScreenCapture(#[from] ScreenCaptureError),

    #[error("Negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Local media has not been acquired")]
    NoLocalMedia,

    #[error("Already in a call")]
    AlreadyInCall,

    #[error("Call session has ended")]
    SessionEnded,
}

// ============================================================================
// STATE & EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Keine Verbindung
    Idle,
    /// Offer/Answer werden ausgetauscht
    Negotiating,
    /// Remote Description gesetzt, Anruf läuft
    Active,
    /// Alles freigegeben, Session nicht wiederverwendbar
    Ended,
}

/// Zustand von Kamera/Mikrofon für die UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaStatus {
    Pending,
    Ready,
    /// z.B. "Kamera nicht verfügbar" anzeigen, Bedienelemente bleiben nutzbar
    Unavailable(MediaAccessError),
}

/// Was die lokale Vorschau gerade zeigt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewSource {
    Off,
    Camera { stream_id: String },
    Screen { stream_id: String },
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(CallState),
    MediaStatusChanged(MediaStatus),
    LocalPreviewChanged(PreviewSource),
    RemoteStreamChanged(Option<MediaStream>),
    LocalCandidate(IceCandidate),
    ScreenShareChanged(bool),
    Error(String),
    /// Anruf beendet, die UI kann wegnavigieren
    Ended,
}

#[derive(Debug, Clone)]
pub struct CallConfig {
    pub ice_servers: Vec<IceServer>,
    pub answer_timeout: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            answer_timeout: DEFAULT_ANSWER_TIMEOUT,
        }
    }
}

// ============================================================================
// INTERNAL STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Caller,
    Callee,
}

enum StopReason {
    User,
    /// Die Plattform hat die Spur mit dieser ID beendet
    TrackEnded(String),
}

type RemoteDescriptionSender = oneshot::Sender<Result<SessionDescription, NegotiationError>>;

struct ScreenShare {
    stream: MediaStream,
    track: Arc<dyn MediaTrack>,
    watcher: JoinHandle<()>,
}

struct SessionState {
    call_state: CallState,
    media_status: MediaStatus,
    local_stream: Option<MediaStream>,
    remote_stream: Option<MediaStream>,
    screen: Option<ScreenShare>,
    connection: Option<Arc<dyn PeerConnection>>,
    /// Erst danach existiert ein Video-Sender auf `connection`
    tracks_attached: bool,
    preview: PreviewSource,
    video_enabled: bool,
    audio_enabled: bool,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    awaiting: Option<(SdpKind, RemoteDescriptionSender)>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            call_state: CallState::Idle,
            media_status: MediaStatus::Pending,
            local_stream: None,
            remote_stream: None,
            screen: None,
            connection: None,
            tracks_attached: false,
            preview: PreviewSource::Off,
            video_enabled: true,
            audio_enabled: true,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            awaiting: None,
            tasks: Vec::new(),
        }
    }

    fn ensure_open(&self) -> Result<(), CallSessionError> {
        if self.call_state == CallState::Ended {
            Err(CallSessionError::SessionEnded)
        } else {
            Ok(())
        }
    }

    /// Verbindung, deren Video-Sender ersetzt werden kann
    fn video_sender_connection(&self) -> Option<Arc<dyn PeerConnection>> {
        self.connection.clone().filter(|_| self.tracks_attached)
    }

    fn camera_preview(&self) -> PreviewSource {
        self.local_stream
            .as_ref()
            .map(|s| PreviewSource::Camera {
                stream_id: s.id().to_string(),
            })
            .unwrap_or(PreviewSource::Off)
    }
}

/// Rest der Freigabe, der `await` braucht
struct Teardown {
    connection: Option<Arc<dyn PeerConnection>>,
    signaling: Arc<dyn SignalingTransport>,
}

impl Teardown {
    async fn finish(self) {
        let Some(pc) = self.connection else {
            return;
        };
        if let Err(e) = self.signaling.send(SignalMessage::Hangup).await {
            tracing::debug!("Could not send hangup: {}", e);
        }
        if let Err(e) = pc.close().await {
            tracing::warn!("Failed to close peer connection: {}", e);
        }
    }
}

struct SessionInner {
    devices: Arc<dyn MediaDevices>,
    connector: Arc<dyn PeerConnector>,
    signaling: Arc<dyn SignalingTransport>,
    config: CallConfig,
    state: Mutex<SessionState>,
    /// Serialisiert alle `replace_video_track` Aufrufe
    replace_lock: tokio::sync::Mutex<()>,
    event_tx: broadcast::Sender<SessionEvent>,
}

// ============================================================================
// CALL SESSION
// ============================================================================

/// Eine Video-Beratung. Beim Drop werden alle Ressourcen freigegeben.
pub struct CallSession {
    inner: Arc<SessionInner>,
}

impl CallSession {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn PeerConnector>,
        signaling: Arc<dyn SignalingTransport>,
        config: CallConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            inner: Arc::new(SessionInner {
                devices,
                connector,
                signaling,
                config,
                state: Mutex::new(SessionState::new()),
                replace_lock: tokio::sync::Mutex::new(()),
                event_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn state(&self) -> CallState {
        self.inner.state.lock().call_state
    }

    pub fn media_status(&self) -> MediaStatus {
        self.inner.state.lock().media_status.clone()
    }

    pub fn local_preview(&self) -> PreviewSource {
        self.inner.state.lock().preview.clone()
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.inner.state.lock().local_stream.clone()
    }

    pub fn remote_stream(&self) -> Option<MediaStream> {
        self.inner.state.lock().remote_stream.clone()
    }

    pub fn is_video_enabled(&self) -> bool {
        self.inner.state.lock().video_enabled
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.inner.state.lock().audio_enabled
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.inner.state.lock().screen.is_some()
    }

    /// Öffnet Kamera und Mikrofon und zeigt sie in der lokalen Vorschau
    pub async fn acquire_local_media(&self) -> Result<(), CallSessionError> {
        self.inner.acquire_local_media().await
    }

    /// Startet den Anruf als anrufende Seite (Offer senden, auf Answer warten)
    pub async fn start_call(&self) -> Result<(), CallSessionError> {
        self.inner.connect(Role::Caller).await
    }

    /// Nimmt einen Anruf an (auf Offer warten, Answer senden)
    pub async fn accept_call(&self) -> Result<(), CallSessionError> {
        self.inner.connect(Role::Callee).await
    }

    /// Kamera an/aus. Gibt den neuen Zustand zurück.
    pub fn toggle_video(&self) -> bool {
        self.inner.toggle(TrackKind::Video)
    }

    /// Mikrofon an/aus. Gibt den neuen Zustand zurück.
    pub fn toggle_audio(&self) -> bool {
        self.inner.toggle(TrackKind::Audio)
    }

    pub async fn start_screen_share(&self) -> Result<(), CallSessionError> {
        self.inner.start_screen_share().await
    }

    pub async fn stop_screen_share(&self) -> Result<(), CallSessionError> {
        self.inner.stop_screen_share(StopReason::User).await
    }

    /// Beendet den Anruf und gibt alle Ressourcen frei. Mehrfacher Aufruf ist ein No-op.
    pub async fn end_call(&self) {
        self.inner.end_call().await;
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        let Some(teardown) = self.inner.begin_teardown() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(teardown.finish());
            }
            Err(_) => {
                tracing::debug!("No runtime while dropping call session, skipping close");
            }
        }
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("state", &self.state())
            .field("media_status", &self.media_status())
            .field("screen_sharing", &self.is_screen_sharing())
            .finish()
    }
}

// ============================================================================
// IMPLEMENTATION
// ============================================================================

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_call_state(&self, st: &mut SessionState, new_state: CallState) {
        st.call_state = new_state;
        self.emit(SessionEvent::StateChanged(new_state));
    }

    async fn acquire_local_media(&self) -> Result<(), CallSessionError> {
        {
            let st = self.state.lock();
            st.ensure_open()?;
            if st.local_stream.is_some() {
                return Ok(());
            }
        }

        let stream = match self.devices.user_media(MediaConstraints::default()).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Camera/microphone unavailable: {}", e);
                let mut st = self.state.lock();
                if st.call_state != CallState::Ended {
                    st.media_status = MediaStatus::Unavailable(e.clone());
                    self.emit(SessionEvent::MediaStatusChanged(st.media_status.clone()));
                }
                return Err(e.into());
            }
        };

        let mut st = self.state.lock();
        if st.call_state == CallState::Ended {
            stream.stop_all();
            return Err(CallSessionError::SessionEnded);
        }
        if st.local_stream.is_some() {
            stream.stop_all();
            return Ok(());
        }

        for track in stream.tracks() {
            match track.kind() {
                TrackKind::Video => track.set_enabled(st.video_enabled),
                TrackKind::Audio => track.set_enabled(st.audio_enabled),
            }
        }

        tracing::info!(
            "Local media acquired: stream {} with {} track(s)",
            stream.id(),
            stream.tracks().len()
        );

        st.local_stream = Some(stream);
        st.media_status = MediaStatus::Ready;
        if st.screen.is_none() {
            let preview = st.camera_preview();
            st.preview = preview.clone();
            self.emit(SessionEvent::LocalPreviewChanged(preview));
        }
        self.emit(SessionEvent::MediaStatusChanged(MediaStatus::Ready));
        Ok(())
    }

    async fn connect(self: &Arc<Self>, role: Role) -> Result<(), CallSessionError> {
        let local = {
            let mut st = self.state.lock();
            st.ensure_open()?;
            let Some(local) = st.local_stream.clone() else {
                tracing::debug!("Call requested before local media was acquired");
                return Err(CallSessionError::NoLocalMedia);
            };
            if st.call_state != CallState::Idle {
                return Err(CallSessionError::AlreadyInCall);
            }
            self.set_call_state(&mut st, CallState::Negotiating);
            local
        };

        tracing::info!("Starting negotiation as {:?}", role);

        match self.negotiate(local, role).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.abort_negotiation(&e).await;
                Err(e.into())
            }
        }
    }

    async fn negotiate(self: &Arc<Self>, local: MediaStream, role: Role) -> Result<(), NegotiationError> {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let pc = self
            .connector
            .connect(&self.config.ice_servers, peer_tx)
            .await?;

        let (remote_tx, remote_rx) = oneshot::channel();
        let expected = match role {
            Role::Caller => SdpKind::Answer,
            Role::Callee => SdpKind::Offer,
        };

        let stored = {
            let mut st = self.state.lock();
            if st.call_state == CallState::Negotiating {
                st.connection = Some(Arc::clone(&pc));
                st.awaiting = Some((expected, remote_tx));
                st.tasks.push(tokio::spawn(pump_peer_events(
                    Arc::downgrade(self),
                    peer_rx,
                )));
                st.tasks.push(tokio::spawn(pump_signaling(
                    Arc::downgrade(self),
                    Arc::clone(&self.signaling),
                )));
                true
            } else {
                false
            }
        };
        if !stored {
            // Session wurde während connect() beendet
            if let Err(e) = pc.close().await {
                tracing::debug!("Failed to close abandoned peer connection: {}", e);
            }
            return Err(NegotiationError::Aborted);
        }

        match role {
            Role::Caller => {
                self.attach_local_tracks(&pc, &local).await?;
                let offer = pc.create_offer().await?;
                pc.set_local_description(offer.clone()).await?;
                self.signaling.send(SignalMessage::Offer(offer)).await?;
                tracing::info!("Offer sent, waiting for answer");

                let answer = self.wait_remote_description(remote_rx).await?;
                pc.set_remote_description(answer).await?;
            }
            Role::Callee => {
                tracing::info!("Waiting for offer");
                let offer = self.wait_remote_description(remote_rx).await?;
                pc.set_remote_description(offer).await?;
                self.attach_local_tracks(&pc, &local).await?;

                let answer = pc.create_answer().await?;
                pc.set_local_description(answer.clone()).await?;
                self.signaling.send(SignalMessage::Answer(answer)).await?;
            }
        }

        self.flush_pending_candidates(&pc).await;

        let mut st = self.state.lock();
        if st.call_state != CallState::Negotiating {
            return Err(NegotiationError::Aborted);
        }
        self.set_call_state(&mut st, CallState::Active);
        tracing::info!("Call active");
        Ok(())
    }

    /// Hängt alle lokalen Spuren an. Läuft gerade eine Bildschirmfreigabe,
    /// sendet der Video-Sender danach die Bildschirm-Spur statt der Kamera.
    async fn attach_local_tracks(
        &self,
        pc: &Arc<dyn PeerConnection>,
        local: &MediaStream,
    ) -> Result<(), NegotiationError> {
        let _guard = self.replace_lock.lock().await;

        for track in local.tracks() {
            pc.add_track(Arc::clone(track), local.id()).await?;
        }

        let screen_track = {
            let mut st = self.state.lock();
            if st.call_state != CallState::Negotiating {
                return Err(NegotiationError::Aborted);
            }
            st.tracks_attached = true;
            st.screen.as_ref().map(|s| Arc::clone(&s.track))
        };
        if let Some(track) = screen_track {
            pc.replace_video_track(Some(track)).await?;
        }
        Ok(())
    }

    async fn wait_remote_description(
        &self,
        rx: oneshot::Receiver<Result<SessionDescription, NegotiationError>>,
    ) -> Result<SessionDescription, NegotiationError> {
        match tokio::time::timeout(self.config.answer_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NegotiationError::Aborted),
            Err(_) => {
                tracing::warn!(
                    "No remote description within {:?}",
                    self.config.answer_timeout
                );
                Err(NegotiationError::Timeout(self.config.answer_timeout))
            }
        }
    }

    async fn flush_pending_candidates(&self, pc: &Arc<dyn PeerConnection>) {
        let pending = {
            let mut st = self.state.lock();
            st.remote_description_set = true;
            std::mem::take(&mut st.pending_candidates)
        };

        if !pending.is_empty() {
            tracing::debug!("Applying {} buffered ICE candidate(s)", pending.len());
        }
        for candidate in pending {
            if let Err(e) = pc.add_ice_candidate(candidate).await {
                tracing::warn!("Failed to apply buffered ICE candidate: {}", e);
            }
        }
    }

    /// Rollback nach fehlgeschlagener Aushandlung: Verbindung schließen,
    /// lokale Medien behalten, zurück auf `Idle`.
    async fn abort_negotiation(&self, error: &NegotiationError) {
        tracing::warn!("Negotiation failed: {}", error);

        let (connection, remote) = {
            let mut st = self.state.lock();
            if st.call_state == CallState::Ended {
                return;
            }
            for task in st.tasks.drain(..) {
                task.abort();
            }
            st.awaiting = None;
            st.pending_candidates.clear();
            st.remote_description_set = false;
            st.tracks_attached = false;
            let remote = st.remote_stream.take();
            let connection = st.connection.take();

            self.set_call_state(&mut st, CallState::Idle);
            self.emit(SessionEvent::Error(error.to_string()));
            if remote.is_some() {
                self.emit(SessionEvent::RemoteStreamChanged(None));
            }
            (connection, remote)
        };

        if let Some(remote) = remote {
            remote.stop_all();
        }
        if let Some(pc) = connection {
            if let Err(e) = pc.close().await {
                tracing::debug!("Failed to close peer connection after abort: {}", e);
            }
        }
    }

    fn toggle(&self, kind: TrackKind) -> bool {
        let mut st = self.state.lock();
        let current = match kind {
            TrackKind::Video => st.video_enabled,
            TrackKind::Audio => st.audio_enabled,
        };
        let Some(local) = st.local_stream.as_ref() else {
            return current;
        };

        let enabled = !current;
        for track in local.tracks().iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
        }
        match kind {
            TrackKind::Video => st.video_enabled = enabled,
            TrackKind::Audio => st.audio_enabled = enabled,
        }

        tracing::info!("{:?} {}", kind, if enabled { "enabled" } else { "disabled" });
        enabled
    }

    async fn start_screen_share(self: &Arc<Self>) -> Result<(), CallSessionError> {
        let _guard = self.replace_lock.lock().await;

        {
            let st = self.state.lock();
            st.ensure_open()?;
            if st.local_stream.is_none() {
                return Err(CallSessionError::NoLocalMedia);
            }
            if st.screen.is_some() {
                return Ok(());
            }
        }

        let stream = self.devices.display_media().await.map_err(|e| {
            tracing::warn!("Screen share unavailable: {}", e);
            e
        })?;
        let Some(track) = stream.first_video_track() else {
            stream.stop_all();
            return Err(ScreenCaptureError::NoVideoTrack.into());
        };

        let connection = {
            let st = self.state.lock();
            if st.call_state == CallState::Ended {
                stream.stop_all();
                return Err(CallSessionError::SessionEnded);
            }
            st.video_sender_connection()
        };

        if let Some(pc) = connection {
            if let Err(e) = pc.replace_video_track(Some(Arc::clone(&track))).await {
                tracing::warn!("Failed to send screen track: {}", e);
                stream.stop_all();
                return Err(e.into());
            }
        }

        let watcher = {
            let session = Arc::downgrade(self);
            let track = Arc::clone(&track);
            tokio::spawn(async move {
                track.ended().await;
                if let Some(inner) = session.upgrade() {
                    tracing::info!("Screen capture ended by the platform");
                    let reason = StopReason::TrackEnded(track.id().to_string());
                    if let Err(e) = inner.stop_screen_share(reason).await {
                        tracing::warn!("Failed to revert screen share: {}", e);
                    }
                }
            })
        };

        let mut st = self.state.lock();
        if st.call_state == CallState::Ended {
            watcher.abort();
            stream.stop_all();
            return Err(CallSessionError::SessionEnded);
        }

        tracing::info!("Screen share started: stream {}", stream.id());
        st.preview = PreviewSource::Screen {
            stream_id: stream.id().to_string(),
        };
        st.screen = Some(ScreenShare {
            stream,
            track,
            watcher,
        });
        self.emit(SessionEvent::LocalPreviewChanged(st.preview.clone()));
        self.emit(SessionEvent::ScreenShareChanged(true));
        Ok(())
    }

    async fn stop_screen_share(&self, reason: StopReason) -> Result<(), CallSessionError> {
        let _guard = self.replace_lock.lock().await;

        let (share, camera, connection) = {
            let mut st = self.state.lock();
            let matches = match (&reason, st.screen.as_ref()) {
                (_, None) => false,
                (StopReason::User, Some(_)) => true,
                (StopReason::TrackEnded(id), Some(share)) => share.track.id() == id,
            };
            if !matches {
                return Ok(());
            }
            let Some(share) = st.screen.take() else {
                return Ok(());
            };
            let camera = st
                .local_stream
                .as_ref()
                .and_then(MediaStream::first_video_track)
                .filter(|t| t.is_live());
            (share, camera, st.video_sender_connection())
        };

        if matches!(reason, StopReason::User) {
            share.watcher.abort();
        }

        let result = match connection {
            Some(pc) => pc.replace_video_track(camera).await,
            None => Ok(()),
        };
        share.stream.stop_all();

        {
            let mut st = self.state.lock();
            if st.call_state != CallState::Ended {
                let preview = st.camera_preview();
                st.preview = preview.clone();
                self.emit(SessionEvent::LocalPreviewChanged(preview));
                self.emit(SessionEvent::ScreenShareChanged(false));
            }
        }
        tracing::info!("Screen share stopped");

        result.map_err(|e| {
            tracing::warn!("Failed to restore camera track: {}", e);
            e.into()
        })
    }

    /// Synchroner Teil der Freigabe. `None` wenn bereits beendet.
    fn begin_teardown(&self) -> Option<Teardown> {
        let mut st = self.state.lock();
        if st.call_state == CallState::Ended {
            return None;
        }

        tracing::info!("Ending call session");

        for task in st.tasks.drain(..) {
            task.abort();
        }
        if let Some(share) = st.screen.take() {
            share.watcher.abort();
            share.stream.stop_all();
        }
        if let Some(local) = st.local_stream.take() {
            local.stop_all();
        }
        let had_remote = match st.remote_stream.take() {
            Some(remote) => {
                remote.stop_all();
                true
            }
            None => false,
        };
        st.awaiting = None;
        st.pending_candidates.clear();
        st.remote_description_set = false;
        st.tracks_attached = false;
        let connection = st.connection.take();

        st.preview = PreviewSource::Off;
        self.emit(SessionEvent::LocalPreviewChanged(PreviewSource::Off));
        if had_remote {
            self.emit(SessionEvent::RemoteStreamChanged(None));
        }
        self.set_call_state(&mut st, CallState::Ended);
        self.emit(SessionEvent::Ended);

        Some(Teardown {
            connection,
            signaling: Arc::clone(&self.signaling),
        })
    }

    async fn end_call(&self) {
        if let Some(teardown) = self.begin_teardown() {
            teardown.finish().await;
        }
    }

    /// Beenden aus einem Hintergrund-Task heraus, der dabei selbst abgebrochen wird
    fn end_call_detached(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.end_call().await;
        });
    }

    async fn on_peer_event(self: &Arc<Self>, event: PeerEvent) {
        match event {
            PeerEvent::RemoteTrack { stream_id, track } => {
                let mut st = self.state.lock();
                if st.call_state == CallState::Ended {
                    track.stop();
                    return;
                }
                tracing::info!("Remote {:?} track {} arrived", track.kind(), track.id());

                let replaced = match st.remote_stream.as_ref() {
                    Some(remote) if remote.id() != stream_id => Some(remote.clone()),
                    _ => None,
                };
                if let Some(old) = replaced {
                    old.stop_all();
                    st.remote_stream = None;
                }

                let remote = st
                    .remote_stream
                    .get_or_insert_with(|| MediaStream::new(stream_id, Vec::new()));
                remote.add_track(track);
                let snapshot = remote.clone();
                self.emit(SessionEvent::RemoteStreamChanged(Some(snapshot)));
            }

            PeerEvent::LocalCandidate(candidate) => {
                tracing::debug!("Local ICE candidate: {}", candidate.candidate);
                self.emit(SessionEvent::LocalCandidate(candidate.clone()));
                if let Err(e) = self
                    .signaling
                    .send(SignalMessage::IceCandidate(candidate))
                    .await
                {
                    tracing::warn!("Failed to send ICE candidate: {}", e);
                }
            }

            PeerEvent::StateChanged(state) => {
                tracing::info!("Peer connection state: {:?}", state);
                if state == PeerState::Failed {
                    self.emit(SessionEvent::Error("Peer connection failed".to_string()));
                    self.end_call_detached();
                }
            }
        }
    }

    async fn on_signal(self: &Arc<Self>, message: SignalMessage) {
        match message {
            SignalMessage::Offer(description) | SignalMessage::Answer(description) => {
                let waiter = {
                    let mut st = self.state.lock();
                    match st.awaiting.take() {
                        Some((kind, tx)) if kind == description.kind => Some(tx),
                        other => {
                            st.awaiting = other;
                            None
                        }
                    }
                };
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Ok(description));
                    }
                    None => tracing::warn!("Ignoring unexpected {:?}", description.kind),
                }
            }

            SignalMessage::IceCandidate(candidate) => {
                let connection = {
                    let mut st = self.state.lock();
                    if st.remote_description_set {
                        st.connection.clone()
                    } else {
                        st.pending_candidates.push(candidate);
                        return;
                    }
                };
                if let Some(pc) = connection {
                    if let Err(e) = pc.add_ice_candidate(candidate).await {
                        tracing::warn!("Failed to add remote ICE candidate: {}", e);
                    }
                }
            }

            SignalMessage::Hangup => {
                tracing::info!("Remote participant hung up");
                self.end_call_detached();
            }
        }
    }

    fn on_signaling_closed(&self) {
        tracing::info!("Signaling channel closed");
        let waiter = self.state.lock().awaiting.take();
        if let Some((_, tx)) = waiter {
            let _ = tx.send(Err(NegotiationError::Signaling(SignalingError::Closed)));
        }
    }
}

// ============================================================================
// BACKGROUND TASKS
// ============================================================================

async fn pump_peer_events(
    session: Weak<SessionInner>,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        inner.on_peer_event(event).await;
    }
}

async fn pump_signaling(session: Weak<SessionInner>, signaling: Arc<dyn SignalingTransport>) {
    loop {
        let message = signaling.recv().await;
        let Some(inner) = session.upgrade() else {
            break;
        };
        match message {
            Some(message) => inner.on_signal(message).await,
            None => {
                inner.on_signaling_closed();
                break;
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
