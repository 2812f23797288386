use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::ids::LessonIndex;

/// Field holding the ordinal of the most recently completed lesson.
pub const LAST_COMPLETED_LESSON: &str = "lastCompletedLesson";
/// Field holding the overall completion percentage.
pub const PROGRESS_PERCENT: &str = "progressPercent";
/// Server-assigned field stamped on every accepted write.
pub const UPDATED_AT: &str = "updatedAt";

/// Fields a client may supply in a progress update.
pub const ALLOWED_FIELDS: [&str; 2] = [LAST_COMPLETED_LESSON, PROGRESS_PERCENT];

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Reasons a progress update payload is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PayloadError {
    #[error("payload is not valid JSON")]
    Malformed(String),

    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("payload contains disallowed field `{0}`")]
    DisallowedField(String),

    #[error("{0} must be an integer")]
    InvalidType(&'static str),

    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
    },
}

//
// ─── PERCENT ───────────────────────────────────────────────────────────────────
//

/// Overall completion percentage, always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct ProgressPercent(u8);

impl ProgressPercent {
    pub const MAX: u8 = 100;

    /// Creates a percentage from an integer.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError::OutOfRange` if the value is outside `0..=100`.
    pub fn new(value: i64) -> Result<Self, PayloadError> {
        u8::try_from(value)
            .ok()
            .filter(|v| *v <= Self::MAX)
            .map(Self)
            .ok_or(PayloadError::OutOfRange {
                field: PROGRESS_PERCENT,
                min: 0,
                max: i64::from(Self::MAX),
            })
    }

    /// Percentage of `total` lessons that are complete, rounded to the nearest
    /// whole percent. An empty catalog counts as 0%.
    #[must_use]
    pub fn from_completion(completed: usize, total: usize) -> Self {
        if total == 0 {
            return Self(0);
        }
        let (completed, total) = (completed.min(total) as u128, total as u128);
        // Integer form of round(completed / total * 100).
        let rounded = (completed * 200 + total) / (total * 2);
        Self(u8::try_from(rounded).unwrap_or(Self::MAX).min(Self::MAX))
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for ProgressPercent {
    type Error = PayloadError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProgressPercent> for u8 {
    fn from(value: ProgressPercent) -> Self {
        value.0
    }
}

//
// ─── UPDATE ────────────────────────────────────────────────────────────────────
//

/// A validated, partial progress update. Omitted fields stay untouched when merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    #[serde(
        rename = "lastCompletedLesson",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_completed_lesson: Option<LessonIndex>,
    #[serde(rename = "progressPercent", skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<ProgressPercent>,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_last_completed_lesson(mut self, lesson: LessonIndex) -> Self {
        self.last_completed_lesson = Some(lesson);
        self
    }

    #[must_use]
    pub fn with_progress_percent(mut self, percent: ProgressPercent) -> Self {
        self.progress_percent = Some(percent);
        self
    }

    /// True when the update carries no client fields (only the timestamp is written).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_completed_lesson.is_none() && self.progress_percent.is_none()
    }

    /// Parse and validate a raw request body. An empty body is an empty update.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError` if the body is not a JSON object or any field
    /// fails validation.
    pub fn from_json_slice(body: &[u8]) -> Result<Self, PayloadError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let value: Value =
            serde_json::from_slice(body).map_err(|e| PayloadError::Malformed(e.to_string()))?;
        match value {
            Value::Object(map) => Self::from_object(&map),
            // A JSON null body carries no fields.
            Value::Null => Ok(Self::default()),
            _ => Err(PayloadError::NotAnObject),
        }
    }

    /// Validate a JSON object against the allowed field set.
    ///
    /// Checks run in order: unknown keys first, then `lastCompletedLesson`,
    /// then `progressPercent`.
    ///
    /// # Errors
    ///
    /// Returns the first `PayloadError` encountered.
    pub fn from_object(map: &Map<String, Value>) -> Result<Self, PayloadError> {
        if let Some(key) = map.keys().find(|k| !ALLOWED_FIELDS.contains(&k.as_str())) {
            return Err(PayloadError::DisallowedField(key.clone()));
        }

        let last_completed_lesson = map
            .get(LAST_COMPLETED_LESSON)
            .map(|value| {
                let n = integer(value).ok_or(PayloadError::InvalidType(LAST_COMPLETED_LESSON))?;
                u32::try_from(n)
                    .map(LessonIndex::new)
                    .map_err(|_| PayloadError::OutOfRange {
                        field: LAST_COMPLETED_LESSON,
                        min: 0,
                        max: i64::from(u32::MAX),
                    })
            })
            .transpose()?;

        let progress_percent = map
            .get(PROGRESS_PERCENT)
            .map(|value| {
                let n = integer(value).ok_or(PayloadError::InvalidType(PROGRESS_PERCENT))?;
                let n = i64::try_from(n).unwrap_or(i64::MAX);
                ProgressPercent::new(n)
            })
            .transpose()?;

        Ok(Self {
            last_completed_lesson,
            progress_percent,
        })
    }
}

/// Integer view of a JSON number. `5` and `5.0` are integers; `5.5` is not.
fn integer(value: &Value) -> Option<i128> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(i) = n.as_i64() {
        return Some(i128::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(i128::from(u));
    }
    let f = n.as_f64()?;
    if !f.is_finite() || f.fract() != 0.0 {
        return None;
    }
    // Integral floats beyond i128 only need to compare as out of range.
    #[allow(clippy::cast_possible_truncation)]
    Some(f.clamp(i128::MIN as f64, i128::MAX as f64) as i128)
}

//
// ─── RECORD ────────────────────────────────────────────────────────────────────
//

/// Stored progress for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressRecord {
    pub last_completed_lesson: Option<LessonIndex>,
    pub progress_percent: Option<ProgressPercent>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    /// Whether a write at `now` falls inside the cooldown after the last write.
    ///
    /// A record that was never stamped is never limited. A timestamp ahead of
    /// `now` counts as inside the window.
    #[must_use]
    pub fn is_rate_limited(&self, now: DateTime<Utc>, min_interval: Duration) -> bool {
        self.updated_at
            .is_some_and(|last| now.signed_duration_since(last) < min_interval)
    }

    /// Earliest instant at which another write would be accepted.
    #[must_use]
    pub fn next_write_at(&self, min_interval: Duration) -> Option<DateTime<Utc>> {
        self.updated_at.map(|last| last + min_interval)
    }
}
