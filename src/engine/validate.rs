use chrono::{NaiveDate, NaiveTime};
use serde_json::Value;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{EngineError, ValidationError};

/// A create payload that passed validation, with its interval derived once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAppointment {
    pub patient_name: String,
    pub provider_name: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub status: Status,
    pub mode: String,
    pub span: Span,
}

impl ValidatedAppointment {
    pub fn into_appointment(self, id: Ulid) -> Appointment {
        Appointment {
            id,
            patient_name: self.patient_name,
            provider_name: self.provider_name,
            date: self.date,
            start_time: self.start_time,
            duration_minutes: self.duration_minutes,
            status: self.status,
            mode: self.mode,
        }
    }
}

/// Presence first (in field order), then format, then ranges.
pub fn validate_create(input: &AppointmentInput) -> Result<ValidatedAppointment, EngineError> {
    let patient_name = required_text(&input.patient_name, "patientName")?;
    let raw_date = required_text(&input.date, "date")?;
    let raw_time = required_text(&input.start_time, "startTime")?;
    let raw_duration = required_duration(&input.duration_minutes)?;
    let provider_name = required_text(&input.provider_name, "providerName")?;
    let mode = required_text(&input.mode, "mode")?;

    for text in [patient_name, provider_name, mode] {
        if text.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("text field too long"));
        }
    }

    let date = parse_date(raw_date)
        .ok_or_else(|| ValidationError::MalformedDate(raw_date.to_string()))?;
    let start_time = parse_time(raw_time)
        .ok_or_else(|| ValidationError::MalformedTime(raw_time.to_string()))?;
    let duration_minutes = parse_duration(raw_duration)?;

    let status = match input.status.as_deref().map(str::trim) {
        None | Some("") => Status::default(),
        Some(raw) => parse_status(raw)?,
    };

    Ok(ValidatedAppointment {
        patient_name: patient_name.to_string(),
        provider_name: provider_name.to_string(),
        date,
        start_time,
        duration_minutes,
        status,
        mode: mode.to_string(),
        span: Span::starting_at(date.and_time(start_time), duration_minutes),
    })
}

pub fn parse_status(raw: &str) -> Result<Status, ValidationError> {
    Status::parse(raw).ok_or_else(|| ValidationError::InvalidStatus(raw.to_string()))
}

fn required_text<'a>(
    value: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(ValidationError::MissingField(field)),
    }
}

fn required_duration(value: &Option<Value>) -> Result<&Value, ValidationError> {
    match value {
        None | Some(Value::Null) => Err(ValidationError::MissingField("durationMinutes")),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(ValidationError::MissingField("durationMinutes"))
        }
        Some(v) => Ok(v),
    }
}

fn parse_duration(value: &Value) -> Result<u32, ValidationError> {
    let minutes = match value {
        Value::Number(n) => n.as_i64(),
        _ => None,
    };
    match minutes {
        Some(m) if m > 0 && m <= i64::from(MAX_DURATION_MINUTES) => Ok(m as u32),
        _ => Err(ValidationError::InvalidDuration(value.to_string())),
    }
}
