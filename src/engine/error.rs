use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::TIME_FORMAT;

/// Rejections raised while validating caller input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingField(&'static str),
    MalformedDate(String),
    MalformedTime(String),
    InvalidDuration(String),
    InvalidStatus(String),
}

impl ValidationError {
    /// Stable machine-readable name for the rejection.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::MissingField(_) => "missing_field",
            ValidationError::MalformedDate(_) => "malformed_date",
            ValidationError::MalformedTime(_) => "malformed_time",
            ValidationError::InvalidDuration(_) => "invalid_duration",
            ValidationError::InvalidStatus(_) => "invalid_status",
        }
    }

    /// Name of the offending input field.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField(f) => f,
            ValidationError::MalformedDate(_) => "date",
            ValidationError::MalformedTime(_) => "startTime",
            ValidationError::InvalidDuration(_) => "durationMinutes",
            ValidationError::InvalidStatus(_) => "status",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingField(field) => write!(f, "missing required field: {field}"),
            ValidationError::MalformedDate(raw) => {
                write!(f, "malformed date {raw:?}: expected YYYY-MM-DD")
            }
            ValidationError::MalformedTime(raw) => {
                write!(f, "malformed time {raw:?}: expected HH:MM")
            }
            ValidationError::InvalidDuration(raw) => {
                write!(f, "invalid duration {raw}: expected a positive number of minutes")
            }
            ValidationError::InvalidStatus(raw) => write!(
                f,
                "invalid status {raw:?}: expected one of Scheduled, Confirmed, Upcoming, Completed, Cancelled"
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug)]
pub enum EngineError {
    Validation(ValidationError),
    /// The provider already has an active appointment overlapping the request.
    Conflict {
        id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
    },
    NotFound(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "{e}"),
            EngineError::Conflict {
                id,
                date,
                start_time,
            } => write!(
                f,
                "scheduling conflict with appointment {id} on {date} at {}",
                start_time.format(TIME_FORMAT)
            ),
            EngineError::NotFound(id) => write!(f, "appointment not found: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
