//! Resource validator.
//!
//! Turns raw request payloads into normalized write inputs. Two failure kinds
//! are kept apart: malformed input (400, field-qualified) is reported here,
//! while ids that are well-formed but blank are returned as `None` so the
//! controller reports the missing reference (404) after its lookups.

use chrono::NaiveTime;
use serde_json::Value;

use crate::{
    error::ApiError,
    models::{
        NewTestAttempt, NewTutorial, TestAttemptChanges, TestAttemptPayload, TutorialChanges,
        TutorialParams,
    },
};

/// Outcome of coercing a raw id field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdField {
    Id(i64),
    /// Present but empty (`""`): resolves to no record.
    Blank,
}

impl IdField {
    pub fn id(self) -> Option<i64> {
        match self {
            IdField::Id(id) => Some(id),
            IdField::Blank => None,
        }
    }
}

/// Coerces a JSON value into an id. Integers and numeric strings are accepted.
pub fn coerce_id(field: &str, value: &Value) -> Result<IdField, ApiError> {
    match value {
        Value::Null => Ok(IdField::Blank),
        Value::Number(n) => n.as_i64().map(IdField::Id).ok_or_else(|| ApiError::invalid(field)),
        Value::String(s) if s.trim().is_empty() => Ok(IdField::Blank),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(IdField::Id)
            .map_err(|_| ApiError::invalid(field)),
        _ => Err(ApiError::invalid(field)),
    }
}

/// Like `coerce_id`, but an absent field is reported as missing.
pub fn require_id(field: &str, value: Option<&Value>) -> Result<IdField, ApiError> {
    value
        .map(|v| coerce_id(field, v))
        .unwrap_or_else(|| Err(ApiError::missing(field)))
}

/// Parses an id taken from a path segment or query string.
pub fn parse_id(field: &str, raw: &str) -> Result<i64, ApiError> {
    raw.trim().parse::<i64>().map_err(|_| ApiError::invalid(field))
}

/// Parses a required scoping parameter (`?unit_id=`).
pub fn require_scope(field: &str, raw: Option<&str>) -> Result<i64, ApiError> {
    match raw {
        None => Err(ApiError::missing(field)),
        Some(value) if value.trim().is_empty() => Err(ApiError::empty(field)),
        Some(value) => parse_id(field, value),
    }
}

/// Parses an optional id from a query string. Absent or blank means no filter.
pub fn optional_id(field: &str, raw: Option<&str>) -> Result<Option<i64>, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_id(field, value).map(Some),
    }
}

/// Parses a boolean query flag (`true`/`false`, `1`/`0`). Absent or blank is `None`.
pub fn parse_flag(field: &str, raw: Option<&str>) -> Result<Option<bool>, ApiError> {
    match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") => Ok(None),
        Some("true" | "1") => Ok(Some(true)),
        Some("false" | "0") => Ok(Some(false)),
        Some(_) => Err(ApiError::invalid(field)),
    }
}

fn coerce_i32(field: &str, value: &Value) -> Result<Option<i32>, ApiError> {
    match coerce_id(field, value)? {
        IdField::Blank => Ok(None),
        IdField::Id(n) => i32::try_from(n).map(Some).map_err(|_| ApiError::invalid(field)),
    }
}

fn required_text(field: &str, value: Option<&String>) -> Result<String, ApiError> {
    match value {
        None => Err(ApiError::missing(field)),
        Some(text) if text.trim().is_empty() => Err(ApiError::empty(field)),
        Some(text) => Ok(text.trim().to_string()),
    }
}

/// Empty text on update means "leave unchanged".
fn optional_text(value: Option<&String>) -> Option<String> {
    value
        .map(|text| text.trim())
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// parse_meeting_time
///
/// Accepts 24-hour (`18:00`, `18:00:00`) and 12-hour (`3pm`, `3:30 PM`) forms.
/// Returns `None` for anything else.
pub fn parse_meeting_time(raw: &str) -> Option<NaiveTime> {
    let text = raw.trim();
    for format in ["%H:%M", "%H:%M:%S"] {
        if let Ok(time) = NaiveTime::parse_from_str(text, format) {
            return Some(time);
        }
    }

    let lower = text.to_ascii_lowercase();
    let (clock, pm) = if let Some(clock) = lower.strip_suffix("pm") {
        (clock.trim(), true)
    } else if let Some(clock) = lower.strip_suffix("am") {
        (clock.trim(), false)
    } else {
        return None;
    };

    let (hour, minute) = match clock.split_once(':') {
        Some((h, m)) => (h.parse::<u32>().ok()?, m.parse::<u32>().ok()?),
        None => (clock.parse::<u32>().ok()?, 0),
    };
    if !(1..=12).contains(&hour) {
        return None;
    }
    let hour = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, true) => h + 12,
        (h, false) => h,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn tutorial_field(name: &str) -> String {
    format!("tutorial[{name}]")
}

/// TutorialCreateFields
///
/// Output of create validation. Referenced ids are optional because blank ids
/// must surface as missing references, not as malformed input.
#[derive(Debug, Clone, PartialEq)]
pub struct TutorialCreateFields {
    pub unit_id: Option<i64>,
    pub tutor_id: Option<i64>,
    pub campus_id: Option<i64>,
    pub capacity: i32,
    pub abbreviation: String,
    pub meeting_location: String,
    pub meeting_day: String,
    pub meeting_time: Option<NaiveTime>,
}

impl TutorialCreateFields {
    /// Combines the validated fields with the resolved references.
    pub fn into_new_tutorial(self, unit_id: i64, tutor_id: i64) -> NewTutorial {
        NewTutorial {
            unit_id,
            tutor_id,
            campus_id: self.campus_id,
            capacity: self.capacity,
            abbreviation: self.abbreviation,
            meeting_location: self.meeting_location,
            meeting_day: self.meeting_day,
            meeting_time: self.meeting_time,
        }
    }
}

/// campus_id of -1 (or blank) means "no campus".
fn campus_choice(field: &str, value: &Value) -> Result<Option<i64>, ApiError> {
    Ok(coerce_id(field, value)?.id().filter(|id| *id != -1))
}

/// validate_tutorial_create
///
/// Checks fields in declaration order and stops at the first failure.
pub fn validate_tutorial_create(params: &TutorialParams) -> Result<TutorialCreateFields, ApiError> {
    let unit_id = require_id(&tutorial_field("unit_id"), params.unit_id.as_ref())?.id();
    let tutor_id = require_id(&tutorial_field("tutor_id"), params.tutor_id.as_ref())?.id();

    let campus_id = match params.campus_id.as_ref() {
        Some(value) => campus_choice(&tutorial_field("campus_id"), value)?,
        None => None,
    };

    let capacity = match params.capacity.as_ref() {
        Some(value) => coerce_i32(&tutorial_field("capacity"), value)?.unwrap_or(-1),
        None => -1,
    };

    let abbreviation =
        required_text(&tutorial_field("abbreviation"), params.abbreviation.as_ref())?;
    let meeting_location =
        required_text(&tutorial_field("meeting_location"), params.meeting_location.as_ref())?;
    let meeting_day = required_text(&tutorial_field("meeting_day"), params.meeting_day.as_ref())?;
    let meeting_time_text =
        required_text(&tutorial_field("meeting_time"), params.meeting_time.as_ref())?;

    Ok(TutorialCreateFields {
        unit_id,
        tutor_id,
        campus_id,
        capacity,
        abbreviation,
        meeting_location,
        meeting_day,
        meeting_time: parse_meeting_time(&meeting_time_text),
    })
}

/// validate_tutorial_update
///
/// Every field is optional and empty values are ignored. Ids must still be
/// well-formed when present.
pub fn validate_tutorial_update(params: &TutorialParams) -> Result<TutorialChanges, ApiError> {
    let tutor_id = match params.tutor_id.as_ref() {
        Some(value) => coerce_id(&tutorial_field("tutor_id"), value)?.id(),
        None => None,
    };

    let campus_id = match params.campus_id.as_ref() {
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(value) => Some(campus_choice(&tutorial_field("campus_id"), value)?),
        None => None,
    };

    let capacity = match params.capacity.as_ref() {
        Some(value) => coerce_i32(&tutorial_field("capacity"), value)?,
        None => None,
    };

    let meeting_time = optional_text(params.meeting_time.as_ref()).map(|t| parse_meeting_time(&t));

    Ok(TutorialChanges {
        tutor_id,
        campus_id,
        capacity,
        abbreviation: optional_text(params.abbreviation.as_ref()),
        meeting_location: optional_text(params.meeting_location.as_ref()),
        meeting_day: optional_text(params.meeting_day.as_ref()),
        meeting_time,
    })
}

/// exam_data arrives either as a JSON string or a structured value; both are stored as text.
pub fn exam_data_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Fields of a new test attempt before the task reference has been resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct TestAttemptCreateFields {
    pub task_id: Option<i64>,
    pub name: String,
    pub attempt_number: Option<i32>,
    pub pass_status: bool,
    pub completed: bool,
    pub exam_data: Option<String>,
}

impl TestAttemptCreateFields {
    pub fn into_new_attempt(self, next_attempt_number: i32) -> NewTestAttempt {
        NewTestAttempt {
            task_id: self.task_id,
            name: self.name,
            attempt_number: self.attempt_number.unwrap_or(next_attempt_number),
            pass_status: self.pass_status,
            completed: self.completed,
            exam_data: self.exam_data,
        }
    }
}

pub fn validate_test_attempt_create(
    payload: &TestAttemptPayload,
) -> Result<TestAttemptCreateFields, ApiError> {
    let task_id = match payload.task_id.as_ref() {
        Some(value) => coerce_id("task_id", value)?.id(),
        None => None,
    };
    let name = required_text("name", payload.name.as_ref())?;
    if let Some(n) = payload.attempt_number {
        if n < 1 {
            return Err(ApiError::invalid("attempt_number"));
        }
    }

    Ok(TestAttemptCreateFields {
        task_id,
        name,
        attempt_number: payload.attempt_number,
        pass_status: payload.pass_status.unwrap_or(false),
        completed: payload.completed.unwrap_or(false),
        exam_data: payload.exam_data.as_ref().and_then(exam_data_text),
    })
}

pub fn validate_test_attempt_update(
    payload: &TestAttemptPayload,
) -> Result<TestAttemptChanges, ApiError> {
    if let Some(n) = payload.attempt_number {
        if n < 1 {
            return Err(ApiError::invalid("attempt_number"));
        }
    }

    Ok(TestAttemptChanges {
        name: optional_text(payload.name.as_ref()),
        attempt_number: payload.attempt_number,
        pass_status: payload.pass_status,
        completed: payload.completed,
        exam_data: payload.exam_data.as_ref().and_then(exam_data_text),
    })
}
