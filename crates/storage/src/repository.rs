use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use progress_core::{Clock, SharedClock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::document::{DocPath, Document, FieldValue};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("invalid document path: {0}")]
    InvalidPath(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Key-value document storage addressed by path.
///
/// Writes are merges: only the named fields change and the document is
/// created if absent. `server_time` is the clock used to resolve
/// `FieldValue::ServerTimestamp`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document.
    ///
    /// Returns `Ok(None)` when nothing is stored at the path.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StorageError>;

    /// Merge fields into a document, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write cannot be committed.
    async fn merge(
        &self,
        path: &DocPath,
        fields: Vec<(String, FieldValue)>,
    ) -> Result<(), StorageError>;

    /// Current time on the store's clock.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot report its time.
    async fn server_time(&self) -> Result<DateTime<Utc>, StorageError>;
}

/// Simple in-memory document store for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    docs: Arc<Mutex<HashMap<DocPath, Document>>>,
    clock: SharedClock,
    writes: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            clock: SharedClock::new(clock),
            ..Self::default()
        }
    }

    /// Move a fixed clock forward. Shared by every clone of this store.
    pub fn advance_clock(&self, delta: Duration) {
        self.clock.advance(delta);
    }

    /// Number of committed merges since creation.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Simulate a backend outage: every operation fails with `Connection`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StorageError> {
        self.ensure_available()?;
        let guard = self
            .docs
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(path).cloned())
    }

    async fn merge(
        &self,
        path: &DocPath,
        fields: Vec<(String, FieldValue)>,
    ) -> Result<(), StorageError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut guard = self
            .docs
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.entry(path.clone()).or_default().merge(fields, now);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn server_time(&self) -> Result<DateTime<Utc>, StorageError> {
        self.ensure_available()?;
        Ok(self.clock.now())
    }
}

/// Aggregates the document store behind a trait object for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub documents: Arc<dyn DocumentStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let documents: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        Self { documents }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use progress_core::time::{fixed_clock, fixed_now};
    use serde_json::json;

    fn path() -> DocPath {
        DocPath::parse("users/u1/progress/doc").unwrap()
    }

    #[tokio::test]
    async fn merge_creates_then_updates() {
        let store = InMemoryDocumentStore::with_clock(fixed_clock());
        assert!(store.get(&path()).await.unwrap().is_none());

        store
            .merge(&path(), vec![("a".into(), json!(1).into())])
            .await
            .unwrap();
        store.advance_clock(Duration::seconds(5));
        store
            .merge(
                &path(),
                vec![
                    ("b".into(), json!(2).into()),
                    ("t".into(), FieldValue::ServerTimestamp),
                ],
            )
            .await
            .unwrap();

        let doc = store.get(&path()).await.unwrap().unwrap();
        assert_eq!(doc.get("a"), Some(&json!(1)));
        assert_eq!(doc.get("b"), Some(&json!(2)));
        assert_eq!(
            doc.timestamp("t").unwrap(),
            Some(fixed_now() + Duration::seconds(5))
        );
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn clones_share_documents_and_clock() {
        let store = InMemoryDocumentStore::with_clock(fixed_clock());
        let other = store.clone();
        other.advance_clock(Duration::seconds(1));
        assert_eq!(
            store.server_time().await.unwrap(),
            fixed_now() + Duration::seconds(1)
        );
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_operation() {
        let store = InMemoryDocumentStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get(&path()).await,
            Err(StorageError::Connection(_))
        ));
        assert!(store.merge(&path(), Vec::new()).await.is_err());
        assert_eq!(store.write_count(), 0);
    }
}
