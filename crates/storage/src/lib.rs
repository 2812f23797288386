#![forbid(unsafe_code)]

pub mod document;
pub mod progress;
pub mod repository;
pub mod sqlite;

pub use document::{DocPath, Document, FieldValue};
pub use repository::{DocumentStore, InMemoryDocumentStore, Storage, StorageError};
