//! Appointments Module - gebuchte Beratungstermine
//!
//! Beantwortet die Frage, ob gerade ein Termin "dran" ist: von 5 Minuten
//! vor bis 30 Minuten nach dem Termin darf der Videoanruf gestartet werden.

mod book;
mod model;

pub use book::{AppointmentBook, STORAGE_KEY};
pub use model::{
    Appointment, AppointmentError, AppointmentId, NewAppointment, WINDOW_LEAD_MINUTES,
    WINDOW_TRAIL_MINUTES,
};
