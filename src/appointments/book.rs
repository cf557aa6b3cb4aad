//! Persistente Terminliste
//!
//! Die ganze Liste liegt als JSON-Array unter einem festen Key im
//! `KeyValueStore`. Gelesen wird einmal beim Laden, geschrieben nach
//! jeder Änderung. Speicherfehler werden geloggt, die Liste im
//! Speicher funktioniert trotzdem weiter. Einträge, die sich nicht lesen
//! lassen, bleiben unverändert gespeichert, werden aber nie fällig.

use super::model::{Appointment, AppointmentId, NewAppointment};
use crate::storage::{KeyValueStore, PersistenceError};
use chrono::{Local, NaiveDateTime};
use serde_json::Value;
use std::sync::Arc;

pub const STORAGE_KEY: &str = "appointments";

pub struct AppointmentBook {
    store: Arc<dyn KeyValueStore>,
    appointments: Vec<Appointment>,
    unreadable: Vec<Value>,
}

impl AppointmentBook {
    /// Lädt die Liste. Fehlende oder kaputte Daten ergeben eine leere Liste.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let records = match Self::read(store.as_ref()) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Could not load appointments, starting empty: {}", e);
                Vec::new()
            }
        };

        let mut appointments = Vec::with_capacity(records.len());
        let mut unreadable = Vec::new();
        for record in records {
            match serde_json::from_value::<Appointment>(record.clone()) {
                Ok(appointment) => appointments.push(appointment),
                Err(e) => {
                    tracing::warn!("Skipping unreadable appointment record: {}", e);
                    unreadable.push(record);
                }
            }
        }
        tracing::debug!("Loaded {} appointment(s)", appointments.len());

        Self {
            store,
            appointments,
            unreadable,
        }
    }

    fn read(store: &dyn KeyValueStore) -> Result<Vec<Value>, PersistenceError> {
        match store.get(STORAGE_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn persist(&self) {
        let result = self
            .appointments
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map(|mut records| {
                records.extend(self.unreadable.iter().cloned());
                records
            })
            .and_then(|records| serde_json::to_string(&records))
            .map_err(PersistenceError::from)
            .and_then(|raw| self.store.set(STORAGE_KEY, &raw));

        if let Err(e) = result {
            tracing::warn!("Failed to persist appointments: {}", e);
        }
    }

    /// Legt einen Termin mit neuer ID an. Doppelbuchungen werden nicht geprüft.
    pub fn add(&mut self, new: NewAppointment) -> Appointment {
        let appointment = Appointment::create(new);
        tracing::info!(
            "Booked appointment {} on {}",
            appointment.id(),
            appointment.scheduled_at()
        );

        self.appointments.push(appointment.clone());
        self.persist();
        appointment
    }

    pub fn remove(&mut self, id: &AppointmentId) -> Option<Appointment> {
        let index = self.appointments.iter().position(|a| a.id() == id)?;
        let removed = self.appointments.remove(index);
        tracing::info!("Cancelled appointment {}", id);

        self.persist();
        Some(removed)
    }

    pub fn get(&self, id: &AppointmentId) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id() == id)
    }

    /// Kopie der Liste in Buchungsreihenfolge
    pub fn appointments(&self) -> Vec<Appointment> {
        self.appointments.clone()
    }

    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty()
    }

    /// Erster Termin (in Buchungsreihenfolge), dessen Zeitfenster `now` enthält
    pub fn upcoming_at(&self, now: NaiveDateTime) -> Option<Appointment> {
        self.appointments
            .iter()
            .find(|a| a.is_eligible_at(now))
            .cloned()
    }

    pub fn upcoming(&self) -> Option<Appointment> {
        self.upcoming_at(Local::now().naive_local())
    }
}

impl std::fmt::Debug for AppointmentBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppointmentBook")
            .field("appointments", &self.appointments.len())
            .field("unreadable", &self.unreadable.len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
