//! Kommandozeile: Termine buchen, auflisten, stornieren und prüfen

use crate::appointments::{Appointment, AppointmentId, NewAppointment};
use crate::{AppError, AppState};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "lexcall")]
#[command(about = "Book legal consultations and see which one is open for a video call")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Book a consultation
    Book {
        /// Date as YYYY-MM-DD
        #[arg(long)]
        date: String,

        /// Local time as HH:MM
        #[arg(long)]
        time: String,

        /// Area of law, e.g. "Family Law"
        #[arg(long)]
        category: String,

        /// Contact email
        #[arg(long)]
        contact: String,
    },

    /// List all booked consultations
    List,

    /// Cancel a consultation by id
    Cancel { id: String },

    /// Show the consultation that is open for a call
    Upcoming {
        /// Evaluate at this local time (YYYY-MM-DDTHH:MM) instead of now
        #[arg(long, value_parser = parse_local_datetime)]
        at: Option<NaiveDateTime>,
    },
}

fn parse_local_datetime(value: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|_| format!("expected YYYY-MM-DDTHH:MM, got '{}'", value))
}

fn describe(appointment: &Appointment) -> String {
    format!(
        "{}  {} {}  {}  <{}>",
        appointment.id(),
        appointment.date(),
        appointment.time().format("%H:%M"),
        appointment.category(),
        appointment.contact()
    )
}

/// Führt ein Kommando aus und liefert die Ausgabe für stdout
pub fn execute(command: Command, state: &AppState) -> Result<String, AppError> {
    match command {
        Command::Book {
            date,
            time,
            category,
            contact,
        } => {
            let new = NewAppointment::parse(&date, &time, category, contact)?;
            let appointment = state.book_appointment(new);
            Ok(format!("Booked {}", describe(&appointment)))
        }

        Command::List => {
            let appointments = state.appointments();
            if appointments.is_empty() {
                return Ok("No appointments booked".to_string());
            }
            Ok(appointments
                .iter()
                .map(describe)
                .collect::<Vec<_>>()
                .join("\n"))
        }

        Command::Cancel { id } => {
            let removed = state.cancel_appointment(&AppointmentId::from(id.as_str()))?;
            Ok(format!("Cancelled {}", describe(&removed)))
        }

        Command::Upcoming { at } => {
            let upcoming = match at {
                Some(now) => state.callable_appointment_at(now),
                None => state.callable_appointment(),
            };
            Ok(match upcoming {
                Some(appointment) => format!("Ready to call: {}", describe(&appointment)),
                None => "No appointment is open for a call right now".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appointments::AppointmentBook;
    use crate::config::AppConfig;
    use crate::crypto::KeyPair;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn state() -> AppState {
        let config = AppConfig::from_lookup(|key| {
            (key == "LEXCALL_DATA_DIR").then(|| "/tmp/lexcall-test".to_string())
        })
        .unwrap();
        let book = AppointmentBook::load(Arc::new(MemoryStore::new()));
        AppState::with_parts(config, KeyPair::generate(), book)
    }

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(std::iter::once("lexcall").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    fn book(state: &AppState) {
        let command = parse(&[
            "book",
            "--date",
            "2025-06-01",
            "--time",
            "10:00",
            "--category",
            "Family Law",
            "--contact",
            "a@x.com",
        ]);
        let output = execute(command, state).unwrap();
        assert!(output.starts_with("Booked "));
        assert!(output.ends_with("2025-06-01 10:00  Family Law  <a@x.com>"));
    }

    #[test]
    fn test_book_then_upcoming() {
        let state = state();
        book(&state);

        let inside = execute(parse(&["upcoming", "--at", "2025-06-01T09:56"]), &state).unwrap();
        assert!(inside.starts_with("Ready to call: "));

        let outside = execute(parse(&["upcoming", "--at", "2025-06-01T10:31"]), &state).unwrap();
        assert_eq!(outside, "No appointment is open for a call right now");
    }

    #[test]
    fn test_list_and_cancel() {
        let state = state();
        assert_eq!(execute(Command::List, &state).unwrap(), "No appointments booked");

        book(&state);
        let id = state.appointments()[0].id().to_string();
        assert!(execute(Command::List, &state).unwrap().starts_with(&id));

        let cancelled = execute(Command::Cancel { id: id.clone() }, &state).unwrap();
        assert!(cancelled.starts_with("Cancelled "));
        assert!(matches!(
            execute(Command::Cancel { id }, &state),
            Err(AppError::AppointmentNotFound(_))
        ));
    }

    #[test]
    fn test_book_rejects_bad_date() {
        let state = state();
        let command = parse(&[
            "book",
            "--date",
            "June 1st",
            "--time",
            "10:00",
            "--category",
            "Tax Law",
            "--contact",
            "b@x.com",
        ]);
        assert!(matches!(
            execute(command, &state),
            Err(AppError::Appointment(_))
        ));
        assert!(state.appointments().is_empty());
    }

    #[test]
    fn test_upcoming_rejects_malformed_time() {
        let result = Cli::try_parse_from(["lexcall", "upcoming", "--at", "tomorrow"]);
        assert!(result.is_err());
    }
}
