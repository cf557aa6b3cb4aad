//! Termin-Datenmodell und Zeitfenster

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;
use uuid::Uuid;

/// Minuten vor dem Termin, ab denen der Anruf möglich ist
pub const WINDOW_LEAD_MINUTES: i64 = 5;
/// Minuten nach dem Termin, bis zu denen der Anruf möglich ist
pub const WINDOW_TRAIL_MINUTES: i64 = 30;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppointmentError {
    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Invalid time '{0}', expected HH:MM")]
    InvalidTime(String),
}

// ============================================================================
// IDENTIFIER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(String);

impl AppointmentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AppointmentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// APPOINTMENT
// ============================================================================

/// Eingaben aus dem Buchungsformular
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub category: String,
    pub contact: String,
}

impl NewAppointment {
    /// Parst Datum (`YYYY-MM-DD`) und Uhrzeit (`HH:MM` oder `HH:MM:SS`)
    pub fn parse(
        date: &str,
        time: &str,
        category: impl Into<String>,
        contact: impl Into<String>,
    ) -> Result<Self, AppointmentError> {
        let parsed_date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .map_err(|_| AppointmentError::InvalidDate(date.to_string()))?;
        let parsed_time =
            parse_time(time.trim()).ok_or_else(|| AppointmentError::InvalidTime(time.to_string()))?;

        Ok(Self {
            date: parsed_date,
            time: parsed_time,
            category: category.into(),
            contact: contact.into(),
        })
    }
}

/// Ein gebuchter Beratungstermin. Uhrzeit ist lokale Zeit ohne Zeitzone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    id: AppointmentId,
    date: NaiveDate,
    #[serde(with = "time_format")]
    time: NaiveTime,
    /// Rechtsgebiet, z.B. "Family Law"
    #[serde(alias = "lawyerType")]
    category: String,
    #[serde(alias = "email")]
    contact: String,
}

impl Appointment {
    pub(crate) fn create(new: NewAppointment) -> Self {
        Self {
            id: AppointmentId::generate(),
            date: new.date,
            time: new.time,
            category: new.category,
            contact: new.contact,
        }
    }

    pub fn id(&self) -> &AppointmentId {
        &self.id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn time(&self) -> NaiveTime {
        self.time
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn contact(&self) -> &str {
        &self.contact
    }

    pub fn scheduled_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    /// Von 5 Minuten vorher bis 30 Minuten nachher, beide Enden inklusive
    pub fn eligibility_window(&self) -> RangeInclusive<NaiveDateTime> {
        let at = self.scheduled_at();
        (at - Duration::minutes(WINDOW_LEAD_MINUTES))..=(at + Duration::minutes(WINDOW_TRAIL_MINUTES))
    }

    pub fn is_eligible_at(&self, now: NaiveDateTime) -> bool {
        self.eligibility_window().contains(&now)
    }
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

/// `HH:MM`, Sekunden nur wenn ungleich 0
mod time_format {
    use chrono::{NaiveTime, Timelike};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        let format = if time.second() == 0 { "%H:%M" } else { "%H:%M:%S" };
        serializer.serialize_str(&time.format(format).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let value = String::deserialize(deserializer)?;
        super::parse_time(&value)
            .ok_or_else(|| de::Error::custom(format!("invalid time '{}'", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{}T{}", date, time), "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    fn ten_oclock() -> Appointment {
        Appointment::create(
            NewAppointment::parse("2025-06-01", "10:00", "Family Law", "a@x.com").unwrap(),
        )
    }

    #[test]
    fn test_window_is_inclusive_on_both_ends() {
        let appointment = ten_oclock();
        assert!(appointment.is_eligible_at(at("2025-06-01", "09:55:00")));
        assert!(appointment.is_eligible_at(at("2025-06-01", "10:30:00")));
        assert!(!appointment.is_eligible_at(at("2025-06-01", "09:54:59")));
        assert!(!appointment.is_eligible_at(at("2025-06-01", "10:30:01")));
    }

    #[test]
    fn test_window_crosses_midnight() {
        let appointment = Appointment::create(
            NewAppointment::parse("2025-06-01", "23:50", "Criminal Law", "b@x.com").unwrap(),
        );
        assert!(appointment.is_eligible_at(at("2025-06-02", "00:15:00")));
        assert!(!appointment.is_eligible_at(at("2025-06-02", "00:21:00")));
    }

    #[test]
    fn test_parse_accepts_seconds_and_rejects_garbage() {
        let with_seconds = NewAppointment::parse("2025-06-01", "10:00:30", "Tax", "c@x.com").unwrap();
        assert_eq!(with_seconds.time, NaiveTime::from_hms_opt(10, 0, 30).unwrap());

        assert_eq!(
            NewAppointment::parse("01.06.2025", "10:00", "Tax", "c@x.com"),
            Err(AppointmentError::InvalidDate("01.06.2025".to_string()))
        );
        assert_eq!(
            NewAppointment::parse("2025-06-01", "25:00", "Tax", "c@x.com"),
            Err(AppointmentError::InvalidTime("25:00".to_string()))
        );
    }

    #[test]
    fn test_time_is_stored_without_zero_seconds() {
        let json = serde_json::to_value(ten_oclock()).unwrap();
        assert_eq!(json["date"], "2025-06-01");
        assert_eq!(json["time"], "10:00");
        assert_eq!(json["category"], "Family Law");
    }

    #[test]
    fn test_reads_browser_field_names() {
        let json = r#"{"id":"1717236000000","date":"2025-06-01","time":"10:00","lawyerType":"Family Law","email":"a@x.com"}"#;
        let appointment: Appointment = serde_json::from_str(json).unwrap();
        assert_eq!(appointment.id().as_str(), "1717236000000");
        assert_eq!(appointment.category(), "Family Law");
        assert_eq!(appointment.contact(), "a@x.com");
    }
}
