use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

/// Half-open interval `[start, end)` in naive local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    /// Span of `minutes` beginning at `start`. Saturates at the calendar's upper bound.
    pub fn starting_at(start: NaiveDateTime, minutes: u32) -> Self {
        Self {
            start,
            end: end_of(start, minutes),
        }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

pub(crate) fn end_of(start: NaiveDateTime, minutes: u32) -> NaiveDateTime {
    start
        .checked_add_signed(Duration::minutes(i64::from(minutes)))
        .unwrap_or(NaiveDateTime::MAX)
}

/// Appointment lifecycle status. Any status may move to any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Scheduled,
    Confirmed,
    Upcoming,
    Completed,
    Cancelled,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Scheduled,
        Status::Confirmed,
        Status::Upcoming,
        Status::Completed,
        Status::Cancelled,
    ];

    /// Active appointments hold their slot; only they take part in conflict detection.
    pub fn is_active(self) -> bool {
        !matches!(self, Status::Completed | Status::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Scheduled => "Scheduled",
            Status::Confirmed => "Confirmed",
            Status::Upcoming => "Upcoming",
            Status::Completed => "Completed",
            Status::Cancelled => "Cancelled",
        }
    }

    /// Case-insensitive lookup of one of the five recognized names.
    pub fn parse(s: &str) -> Option<Status> {
        let s = s.trim();
        Status::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// Accepts `HH:MM` or `HH:MM:SS`; the result is truncated to the minute.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    let t = NaiveTime::parse_from_str(s, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()?;
    NaiveTime::from_hms_opt(t.hour(), t.minute(), 0)
}

/// Serde adapter rendering `NaiveTime` as `HH:MM`.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format(super::TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_time(&raw).ok_or_else(|| de::Error::custom(format!("invalid time: {raw}")))
    }
}

/// A booked appointment. Only `status` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Ulid,
    pub patient_name: String,
    pub provider_name: String,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub status: Status,
    pub mode: String,
}

impl Appointment {
    pub fn start(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn span(&self) -> Span {
        Span::starting_at(self.start(), self.duration_minutes)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Raw create payload as received at the boundary, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentInput {
    pub patient_name: Option<String>,
    #[serde(alias = "doctorName")]
    pub provider_name: Option<String>,
    pub date: Option<String>,
    #[serde(alias = "time")]
    pub start_time: Option<String>,
    #[serde(alias = "duration")]
    pub duration_minutes: Option<serde_json::Value>,
    pub status: Option<String>,
    pub mode: Option<String>,
}

impl AppointmentInput {
    pub fn new(
        patient_name: &str,
        provider_name: &str,
        date: &str,
        start_time: &str,
        duration_minutes: i64,
        mode: &str,
    ) -> Self {
        Self {
            patient_name: Some(patient_name.into()),
            provider_name: Some(provider_name.into()),
            date: Some(date.into()),
            start_time: Some(start_time.into()),
            duration_minutes: Some(duration_minutes.into()),
            status: None,
            mode: Some(mode.into()),
        }
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// Conjunctive list filter; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub date: Option<NaiveDate>,
    pub status: Option<Status>,
    pub provider_name_contains: Option<String>,
}

impl ListFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        if self.date.is_some_and(|d| d != appointment.date) {
            return false;
        }
        if self.status.is_some_and(|s| s != appointment.status) {
            return false;
        }
        if let Some(needle) = &self.provider_name_contains {
            let haystack = appointment.provider_name.to_lowercase();
            if !haystack.contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// WAL record format. Flat, one variant per mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Created { appointment: Appointment },
    StatusChanged { id: Ulid, status: Status },
    Deleted { id: Ulid },
}

/// What subscribers receive after a committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Created {
        appointment: Appointment,
    },
    StatusChanged {
        appointment: Appointment,
        previous: Status,
    },
    #[serde(rename_all = "camelCase")]
    Deleted {
        id: Ulid,
        provider_name: String,
    },
}

impl Notification {
    pub fn provider_name(&self) -> &str {
        match self {
            Notification::Created { appointment }
            | Notification::StatusChanged { appointment, .. } => &appointment.provider_name,
            Notification::Deleted { provider_name, .. } => provider_name,
        }
    }
}
