//! LexCall - Video-Beratung für gebuchte Anwaltstermine
//!
//! Zwei Bausteine:
//! - Terminliste mit Zeitfenster-Prüfung (`appointments`)
//! - WebRTC Call-Session mit Bildschirmfreigabe (`call_engine`)
//!
//! Dazu ein signiertes WebSocket-Signaling pro Termin, SQLite als
//! lokaler Speicher und eine Ed25519 Identität pro Installation.

pub mod appointments;
pub mod call_engine;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod media;
pub mod signaling;
pub mod storage;

use appointments::{Appointment, AppointmentBook, AppointmentError, AppointmentId, NewAppointment};
use call_engine::{CallSession, WebRtcConnector};
use chrono::{Local, NaiveDateTime};
use config::AppConfig;
use crypto::KeyPair;
use media::MediaDevices;
use parking_lot::RwLock;
use signaling::{SignalingError, WebSocketSignaling};
use std::sync::Arc;
use storage::{KeyValueStore, MemoryStore, SqliteStore};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// LOGGING
// ============================================================================

/// Installiert den globalen Subscriber. `RUST_LOG` hat Vorrang vor
/// `default_directive`. Ein zweiter Aufruf ändert nichts.
pub fn init_logging(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let filter = match "webrtc=warn".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Invalid appointment: {0}")]
    Appointment(#[from] AppointmentError),

    #[error("Appointment not found: {0}")]
    AppointmentNotFound(AppointmentId),

    #[error("Appointment {0} is not open for calls right now")]
    NotCallable(AppointmentId),
}

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Application State, wird einmal erstellt und an die Oberfläche übergeben
pub struct AppState {
    config: AppConfig,
    keypair: Arc<KeyPair>,
    appointments: RwLock<AppointmentBook>,
}

impl AppState {
    /// Öffnet Datenbank und Identität im Datenverzeichnis. Ist das
    /// Verzeichnis nicht nutzbar, läuft die Sitzung nur im Speicher.
    pub fn init(config: AppConfig) -> Self {
        tracing::info!("Initializing LexCall in {:?}", config.data_dir);

        let keypair = match KeyPair::load_or_create(&config.identity_key_path()) {
            Ok(keypair) => keypair,
            Err(e) => {
                tracing::warn!("Identity key unavailable, using a temporary one: {}", e);
                KeyPair::generate()
            }
        };
        tracing::info!("Loaded keypair: {:?}", keypair);

        let store: Arc<dyn KeyValueStore> = match SqliteStore::open(&config.database_path()) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!("Database unavailable, appointments are kept in memory: {}", e);
                Arc::new(MemoryStore::new())
            }
        };
        let book = AppointmentBook::load(store);

        Self::with_parts(config, keypair, book)
    }

    pub fn with_parts(config: AppConfig, keypair: KeyPair, appointments: AppointmentBook) -> Self {
        Self {
            config,
            keypair: Arc::new(keypair),
            appointments: RwLock::new(appointments),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn public_key(&self) -> String {
        self.keypair.public_key_base64()
    }

    pub fn book_appointment(&self, new: NewAppointment) -> Appointment {
        self.appointments.write().add(new)
    }

    pub fn cancel_appointment(&self, id: &AppointmentId) -> Result<Appointment, AppError> {
        self.appointments
            .write()
            .remove(id)
            .ok_or_else(|| AppError::AppointmentNotFound(id.clone()))
    }

    pub fn appointments(&self) -> Vec<Appointment> {
        self.appointments.read().appointments()
    }

    /// Der Termin, für den gerade ein Anruf angeboten werden soll
    pub fn callable_appointment(&self) -> Option<Appointment> {
        self.callable_appointment_at(Local::now().naive_local())
    }

    pub fn callable_appointment_at(&self, now: NaiveDateTime) -> Option<Appointment> {
        self.appointments.read().upcoming_at(now)
    }

    /// Betritt den Signaling-Raum des Termins und erstellt die Call-Session
    pub async fn open_call(
        &self,
        appointment: &Appointment,
        devices: Arc<dyn MediaDevices>,
    ) -> Result<CallSession, AppError> {
        if !appointment.is_eligible_at(Local::now().naive_local()) {
            return Err(AppError::NotCallable(appointment.id().clone()));
        }

        let signaling = WebSocketSignaling::connect(
            self.config.signaling_url.as_str(),
            appointment.id().as_str(),
            Arc::clone(&self.keypair),
        )
        .await?;
        tracing::info!(
            "Joined room {} as {}",
            signaling.room_id(),
            signaling.peer_id()
        );

        Ok(CallSession::new(
            devices,
            Arc::new(WebRtcConnector::new()),
            Arc::new(signaling),
            self.config.call_config(),
        ))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("data_dir", &self.config.data_dir)
            .field("keypair", &self.keypair)
            .field("appointments", &*self.appointments.read())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use media::{MediaAccessError, MediaConstraints, MediaStream, ScreenCaptureError};
    use std::path::Path;

    struct NoDevices;

    #[async_trait]
    impl MediaDevices for NoDevices {
        async fn user_media(
            &self,
            _constraints: MediaConstraints,
        ) -> Result<MediaStream, MediaAccessError> {
            Err(MediaAccessError::DeviceNotFound)
        }

        async fn display_media(&self) -> Result<MediaStream, ScreenCaptureError> {
            Err(ScreenCaptureError::NoSource)
        }
    }

    fn config_in(dir: &Path) -> AppConfig {
        let dir = dir.to_string_lossy().to_string();
        AppConfig::from_lookup(|key| (key == "LEXCALL_DATA_DIR").then(|| dir.clone())).unwrap()
    }

    fn in_memory_state() -> AppState {
        let book = AppointmentBook::load(Arc::new(MemoryStore::new()));
        AppState::with_parts(config_in(Path::new("/tmp/lexcall-test")), KeyPair::generate(), book)
    }

    fn at(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M").unwrap()
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging("info");
        init_logging("debug");
    }

    #[test]
    fn test_init_creates_database_and_identity() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let booked = {
            let state = AppState::init(config.clone());
            state.book_appointment(
                NewAppointment::parse("2025-06-01", "10:00", "Family Law", "a@x.com").unwrap(),
            )
        };

        assert!(config.database_path().exists());
        assert!(config.identity_key_path().exists());

        let state = AppState::init(config);
        assert_eq!(state.appointments(), vec![booked]);
    }

    #[test]
    fn test_init_with_unusable_data_dir_runs_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let config = config_in(&blocker.join("data"));

        let state = AppState::init(config);
        assert!(!state.public_key().is_empty());

        let booked = state.book_appointment(
            NewAppointment::parse("2025-06-01", "10:00", "Family Law", "a@x.com").unwrap(),
        );
        assert_eq!(state.appointments(), vec![booked.clone()]);
        assert_eq!(state.callable_appointment_at(at("2025-06-01T09:56")), Some(booked));
    }

    #[test]
    fn test_callable_appointment_uses_window() {
        let state = in_memory_state();
        let booked = state.book_appointment(
            NewAppointment::parse("2025-06-01", "10:00", "Family Law", "a@x.com").unwrap(),
        );

        assert_eq!(state.callable_appointment_at(at("2025-06-01T09:56")), Some(booked));
        assert_eq!(state.callable_appointment_at(at("2025-06-01T10:31")), None);
    }

    #[test]
    fn test_cancel_unknown_appointment() {
        let state = in_memory_state();
        let missing = AppointmentId::from("missing");
        assert!(matches!(
            state.cancel_appointment(&missing),
            Err(AppError::AppointmentNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn test_open_call_outside_window_is_rejected() {
        let state = in_memory_state();
        let past = state.book_appointment(
            NewAppointment::parse("2020-01-01", "10:00", "Family Law", "a@x.com").unwrap(),
        );

        let result = state.open_call(&past, Arc::new(NoDevices)).await;
        assert!(matches!(result, Err(AppError::NotCallable(_))));
    }
}
