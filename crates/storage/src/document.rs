//! Document model shared by every store backend.
//!
//! A document is a flat JSON object addressed by a slash-separated path of
//! alternating collection and document segments (`users/{uid}/progress/doc`).
//! Timestamps are stored as RFC 3339 strings in UTC.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::repository::StorageError;

/// Path of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocPath(String);

impl DocPath {
    /// Build a path from its segments.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidPath` if there are no segments, an odd
    /// number of them (the path would name a collection), or any segment is
    /// empty or contains `/`.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parts = Vec::new();
        for segment in segments {
            let segment = segment.as_ref();
            if segment.is_empty() || segment.contains('/') {
                return Err(StorageError::InvalidPath(segment.to_owned()));
            }
            parts.push(segment.to_owned());
        }
        if parts.is_empty() || parts.len() % 2 != 0 {
            return Err(StorageError::InvalidPath(parts.join("/")));
        }
        Ok(Self(parts.join("/")))
    }

    /// Parse a slash-separated path.
    ///
    /// # Errors
    ///
    /// See [`DocPath::from_segments`].
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        Self::from_segments(raw.split('/'))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value written by a merge.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Resolved by the store to its own clock at commit time.
    ServerTimestamp,
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Stored document body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Read a timestamp field.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the field exists but is not an
    /// RFC 3339 string.
    pub fn timestamp(&self, field: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(raw)) => DateTime::parse_from_rfc3339(raw)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| StorageError::Serialization(format!("{field}: {e}"))),
            Some(other) => Err(StorageError::Serialization(format!(
                "{field}: expected timestamp, found {other}"
            ))),
        }
    }

    /// Overwrite only the named fields, resolving server timestamps to `now`.
    pub fn merge(&mut self, fields: Vec<(String, FieldValue)>, now: DateTime<Utc>) {
        for (name, value) in fields {
            let value = match value {
                FieldValue::Value(v) => v,
                FieldValue::ServerTimestamp => encode_timestamp(now),
            };
            self.fields.insert(name, value);
        }
    }
}

/// Canonical stored form of a timestamp.
#[must_use]
pub fn encode_timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true))
}
