//! Media Module - Schnittstelle zur Medien-Plattform
//!
//! Die eigentliche Geräte-Erfassung (Kamera, Mikrofon, Bildschirm) gehört
//! der Plattform. Dieses Modul definiert nur die Grenze:
//! - `MediaTrack` / `TrackHandle` für einzelne Spuren
//! - `MediaStream` als Bündel von Spuren
//! - `MediaDevices` für Kamera/Mikrofon und Bildschirmfreigabe

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Kamera oder Mikrofon konnten nicht geöffnet werden
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaAccessError {
    #[error("Camera/microphone permission denied")]
    PermissionDenied,

    #[error("No camera or microphone found")]
    DeviceNotFound,

    #[error("Media platform error: {0}")]
    Platform(String),
}

/// Bildschirmfreigabe fehlgeschlagen
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScreenCaptureError {
    #[error("Screen capture permission denied")]
    PermissionDenied,

    #[error("No screen or window selected")]
    NoSource,

    #[error("Screen capture stream has no video track")]
    NoVideoTrack,

    #[error("Screen capture platform error: {0}")]
    Platform(String),
}

// ============================================================================
// TRACKS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Eine einzelne Audio- oder Video-Spur der Plattform
#[async_trait]
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Ob die Spur gerade Daten überträgt (Mute/Kamera aus = `false`)
    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    /// `false` sobald die Spur beendet wurde
    fn is_live(&self) -> bool;

    /// Gibt das Gerät frei. Mehrfacher Aufruf ist erlaubt.
    fn stop(&self);

    /// Wartet bis die Spur beendet ist (durch `stop` oder durch die Plattform)
    async fn ended(&self);
}

/// Fertige `MediaTrack`-Implementierung mit Ende-Signal
///
/// Plattform-Adapter und Remote-Spuren verwenden diesen Typ direkt.
pub struct TrackHandle {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    ended_tx: watch::Sender<bool>,
}

impl TrackHandle {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        let (ended_tx, _) = watch::channel(false);
        Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            ended_tx,
        }
    }

    /// Beendet die Spur von Plattform-Seite (z.B. "Freigabe beenden" im OS-Dialog)
    pub fn end(&self) {
        self.ended_tx.send_replace(true);
    }
}

#[async_trait]
impl MediaTrack for TrackHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        !*self.ended_tx.borrow()
    }

    fn stop(&self) {
        if self.is_live() {
            tracing::debug!("Stopping {:?} track {}", self.kind, self.id);
        }
        self.ended_tx.send_replace(true);
    }

    async fn ended(&self) {
        let mut rx = self.ended_tx.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }
}

impl fmt::Debug for TrackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

// ============================================================================
// STREAMS
// ============================================================================

/// Bündel von Spuren mit gemeinsamer Stream-ID
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks_of(TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks_of(TrackKind::Audio)
    }

    pub fn first_video_track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.video_tracks().next().cloned()
    }

    /// Fügt eine Spur hinzu, außer eine Spur mit derselben ID existiert bereits
    pub fn add_track(&mut self, track: Arc<dyn MediaTrack>) -> bool {
        if self.tracks.iter().any(|t| t.id() == track.id()) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    /// Stoppt alle Spuren (best effort)
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }
}

// ============================================================================
// DEVICES
// ============================================================================

/// Welche Geräte beim Öffnen angefordert werden
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Zugriff der Plattform auf Aufnahmegeräte
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Öffnet Kamera und/oder Mikrofon
    async fn user_media(&self, constraints: MediaConstraints)
        -> Result<MediaStream, MediaAccessError>;

    /// Fragt eine Bildschirm- oder Fensteraufnahme an
    async fn display_media(&self) -> Result<MediaStream, ScreenCaptureError>;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn camera_stream() -> MediaStream {
        MediaStream::new(
            "cam",
            vec![
                Arc::new(TrackHandle::new("mic-1", TrackKind::Audio)) as Arc<dyn MediaTrack>,
                Arc::new(TrackHandle::new("cam-1", TrackKind::Video)),
            ],
        )
    }

    #[test]
    fn test_stream_splits_tracks_by_kind() {
        let stream = camera_stream();
        assert_eq!(stream.audio_tracks().count(), 1);
        assert_eq!(stream.video_tracks().count(), 1);
        assert_eq!(stream.first_video_track().unwrap().id(), "cam-1");
    }

    #[test]
    fn test_add_track_ignores_duplicate_ids() {
        let mut stream = camera_stream();
        let duplicate = Arc::new(TrackHandle::new("cam-1", TrackKind::Video));
        assert!(!stream.add_track(duplicate));
        assert_eq!(stream.tracks().len(), 2);
    }

    #[test]
    fn test_stop_all_is_repeatable() {
        let stream = camera_stream();
        stream.stop_all();
        stream.stop_all();
        assert!(stream.tracks().iter().all(|t| !t.is_live()));
    }

    #[tokio::test]
    async fn test_ended_resolves_after_platform_end() {
        let track = Arc::new(TrackHandle::new("screen-1", TrackKind::Video));
        let waiter = {
            let track = Arc::clone(&track);
            tokio::spawn(async move { track.ended().await })
        };

        track.end();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("ended() did not resolve")
            .unwrap();
        assert!(!track.is_live());
    }

    #[tokio::test]
    async fn test_ended_resolves_immediately_when_already_stopped() {
        let track = TrackHandle::new("cam-1", TrackKind::Video);
        track.stop();
        tokio::time::timeout(Duration::from_millis(100), track.ended())
            .await
            .expect("ended() should not block on a stopped track");
    }
}
