//! Mapping between progress domain types and their per-user document.

use progress_core::model::{
    LAST_COMPLETED_LESSON, LessonIndex, PROGRESS_PERCENT, ProgressPercent, ProgressRecord,
    ProgressUpdate, UPDATED_AT, UserId,
};
use serde_json::Value;

use crate::document::{DocPath, Document, FieldValue};
use crate::repository::StorageError;

/// Location of a user's progress document: `users/{uid}/progress/doc`.
///
/// # Errors
///
/// Returns `StorageError::InvalidPath` if the user id cannot form a path segment.
pub fn progress_path(user: &UserId) -> Result<DocPath, StorageError> {
    DocPath::from_segments(["users", user.as_str(), "progress", "doc"])
}

/// Decode a stored progress document.
///
/// # Errors
///
/// Returns `StorageError::Serialization` if a known field holds a value of the
/// wrong shape.
pub fn record_from_document(doc: &Document) -> Result<ProgressRecord, StorageError> {
    let last_completed_lesson = match doc.get(LAST_COMPLETED_LESSON) {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(LessonIndex::new)
                .ok_or_else(|| mismatch(LAST_COMPLETED_LESSON, value))?,
        ),
    };

    let progress_percent = match doc.get(PROGRESS_PERCENT) {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_i64()
                .and_then(|v| ProgressPercent::new(v).ok())
                .ok_or_else(|| mismatch(PROGRESS_PERCENT, value))?,
        ),
    };

    Ok(ProgressRecord {
        last_completed_lesson,
        progress_percent,
        updated_at: doc.timestamp(UPDATED_AT)?,
    })
}

/// Fields to merge for an accepted update: the supplied values plus a server
/// timestamp.
#[must_use]
pub fn update_fields(update: &ProgressUpdate) -> Vec<(String, FieldValue)> {
    let mut fields = Vec::with_capacity(3);
    if let Some(lesson) = update.last_completed_lesson {
        fields.push((
            LAST_COMPLETED_LESSON.to_owned(),
            FieldValue::Value(Value::from(lesson.value())),
        ));
    }
    if let Some(percent) = update.progress_percent {
        fields.push((
            PROGRESS_PERCENT.to_owned(),
            FieldValue::Value(Value::from(percent.value())),
        ));
    }
    fields.push((UPDATED_AT.to_owned(), FieldValue::ServerTimestamp));
    fields
}

fn mismatch(field: &str, value: &Value) -> StorageError {
    StorageError::Serialization(format!("{field}: unexpected value {value}"))
}
