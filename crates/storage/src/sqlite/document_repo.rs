use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::document::{DocPath, Document, FieldValue};
use crate::repository::{DocumentStore, StorageError};

use super::SqliteDocumentStore;
use super::mapping::{body_from_document, conn, document_from_body, value_json};

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StorageError> {
        let row = sqlx::query("SELECT body FROM documents WHERE path = ?1")
            .bind(path.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let body: String = row
            .try_get("body")
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        document_from_body(&body).map(Some)
    }

    async fn merge(
        &self,
        path: &DocPath,
        fields: Vec<(String, FieldValue)>,
    ) -> Result<(), StorageError> {
        let now = self.now();
        let mut patch = Document::new();
        patch.merge(fields, now);

        // Single upsert so SQLite takes the write lock when the statement starts.
        let sql = merge_statement(patch.fields().len());
        let mut query = sqlx::query::<sqlx::Sqlite>(&sql)
            .bind(path.as_str())
            .bind(body_from_document(&patch)?)
            .bind(now);
        for (name, value) in patch.fields() {
            query = query.bind(field_path(name)?).bind(value_json(value)?);
        }
        query.execute(self.pool()).await.map_err(conn)?;
        Ok(())
    }

    async fn server_time(&self) -> Result<DateTime<Utc>, StorageError> {
        Ok(self.now())
    }
}

/// Upsert that creates the document from `?2` or sets each named field with
/// `json_set`. Field pairs bind from `?4` onward.
fn merge_statement(field_count: usize) -> String {
    let mut body = String::from("documents.body");
    if field_count > 0 {
        body = String::from("json_set(documents.body");
        for i in 0..field_count {
            let at = 4 + 2 * i;
            let _ = write!(body, ", ?{at}, json(?{})", at + 1);
        }
        body.push(')');
    }
    format!(
        r"
        INSERT INTO documents (path, body, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?3)
        ON CONFLICT(path) DO UPDATE SET
            body = {body},
            updated_at = excluded.updated_at
        "
    )
}

fn field_path(name: &str) -> Result<String, StorageError> {
    if name.contains('"') {
        return Err(StorageError::Serialization(format!(
            "field name cannot contain quotes: {name}"
        )));
    }
    Ok(format!("$.\"{name}\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_binds_one_pair_per_field() {
        assert!(merge_statement(0).contains("body = documents.body,"));
        let sql = merge_statement(2);
        assert!(sql.contains("json_set(documents.body, ?4, json(?5), ?6, json(?7))"));
    }

    #[test]
    fn field_paths_are_quoted_labels() {
        assert_eq!(field_path("updatedAt").unwrap(), "$.\"updatedAt\"");
        assert!(field_path("a\"b").is_err());
    }
}
