use serde_json::Value;

use crate::document::Document;
use crate::repository::StorageError;

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn document_from_body(body: &str) -> Result<Document, StorageError> {
    match serde_json::from_str::<Value>(body).map_err(ser)? {
        Value::Object(map) => Ok(Document::from_map(map)),
        other => Err(StorageError::Serialization(format!(
            "document body is not an object: {other}"
        ))),
    }
}

pub(crate) fn body_from_document(doc: &Document) -> Result<String, StorageError> {
    serde_json::to_string(doc.fields()).map_err(ser)
}

pub(crate) fn value_json(value: &Value) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(ser)
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}
