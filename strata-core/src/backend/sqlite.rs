//! SQLite-backed document backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{BackendAdapter, BackendId, BackendQuery, ResultItem};
use crate::error::{Error, Result};
use crate::record::{Category, KnowledgeRecord};

/// Current document schema version.
pub const DOCUMENT_SCHEMA_VERSION: i32 = 1;

/// Document store keeping records as rows with JSON attribute columns.
pub struct SqliteDocumentBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDocumentBackend {
    /// Open or create a document store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Storage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Storage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// Lock waits and SQLite busy retries happen off the async workers, so a
    /// caller's timeout still fires while the database is locked.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
            f(&conn).map_err(|e| Error::backend(BackendId::Document.as_str(), e.to_string()))
        })
        .await
        .map_err(|e| Error::Internal(format!("Task join error: {e}")))?
    }

    /// Number of stored documents.
    pub async fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
        })
        .await
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<ResultItem> {
        let category: String = row.get(2)?;
        let domain: String = row.get(3)?;
        let attributes: HashMap<String, Value> = row
            .get::<_, Option<String>>(6)?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        let created_at: String = row.get(8)?;

        let mut item = ResultItem {
            id: Some(row.get(0)?),
            content: row.get(1)?,
            confidence: row.get(7)?,
            attributes,
            timestamp: DateTime::parse_from_rfc3339(&created_at)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            category: category.parse::<Category>().ok(),
            source: None,
        };
        item.attributes.insert("domain".into(), Value::String(domain));
        if let Some(owner) = row.get::<_, Option<String>>(4)? {
            item.attributes.insert("owner_id".into(), Value::String(owner));
        }
        if let Some(group) = row.get::<_, Option<String>>(5)? {
            item.attributes.insert("group_id".into(), Value::String(group));
        }
        Ok(item)
    }
}

/// Initialize the document schema.
fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                category TEXT NOT NULL,
                domain TEXT NOT NULL,
                owner_id TEXT,
                group_id TEXT,
                attributes TEXT,
                confidence REAL NOT NULL DEFAULT 0.5,
                created_at TEXT NOT NULL,
                links TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id, group_id)",
            [],
        )?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![DOCUMENT_SCHEMA_VERSION],
        )?;
    }

    Ok(())
}

#[async_trait]
impl BackendAdapter for SqliteDocumentBackend {
    fn id(&self) -> BackendId {
        BackendId::Document
    }

    async fn store(&self, record: &KnowledgeRecord) -> Result<()> {
        let attributes = serde_json::to_string(&record.attributes)?;
        let links = serde_json::to_string(&record.links)?;
        let record = record.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO documents (
                    id, content, category, domain, owner_id, group_id,
                    attributes, confidence, created_at, links
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id.to_string(),
                    record.content,
                    record.category.as_str(),
                    record.domain.as_str(),
                    record.owner_id,
                    record.group_id,
                    attributes,
                    record.confidence,
                    record.created_at.to_rfc3339(),
                    links,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn search(&self, query: &BackendQuery) -> Result<Vec<ResultItem>> {
        let terms = query.terms();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let filters = query.filters.clone();
        let limit = query.limit;

        self.with_conn(move |conn| {
            let mut sql = String::from(
                "SELECT id, content, category, domain, owner_id, group_id,
                        attributes, confidence, created_at
                 FROM documents WHERE (",
            );
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            let clauses: Vec<&str> = terms.iter().map(|_| "LOWER(content) LIKE ?").collect();
            sql.push_str(&clauses.join(" OR "));
            sql.push(')');
            for term in &terms {
                params_vec.push(Box::new(format!("%{}%", term)));
            }

            if let Some(category) = filters.category {
                sql.push_str(" AND category = ?");
                params_vec.push(Box::new(category.as_str()));
            }
            if let Some(domain) = filters.domain {
                sql.push_str(" AND domain = ?");
                params_vec.push(Box::new(domain.as_str()));
            }
            if let Some(ref owner) = filters.owner_id {
                sql.push_str(" AND owner_id = ?");
                params_vec.push(Box::new(owner.clone()));
            }
            if let Some(ref group) = filters.group_id {
                sql.push_str(" AND group_id = ?");
                params_vec.push(Box::new(group.clone()));
            }
            if let Some(min) = filters.min_confidence {
                sql.push_str(" AND confidence >= ?");
                params_vec.push(Box::new(min));
            }

            sql.push_str(" ORDER BY confidence DESC, created_at DESC");
            sql.push_str(&format!(" LIMIT {}", limit));

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(params_refs.as_slice(), |row| Self::row_to_item(row))?
                .filter_map(|r| r.ok())
                .collect();

            Ok(items)
        })
        .await
    }

    async fn stats(&self) -> Result<Value> {
        let documents = self.count().await?;
        Ok(json!({
            "backend": BackendId::Document.as_str(),
            "documents": documents,
            "schema_version": DOCUMENT_SCHEMA_VERSION,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SearchFilters;
    use crate::orchestrator::bounded;
    use crate::record::{Domain, Link};
    use std::time::Duration;

    #[tokio::test]
    async fn test_store_and_search_documents() {
        let backend = SqliteDocumentBackend::in_memory().unwrap();
        let record = KnowledgeRecord::new(
            "Session configuration: duration 60min, weekly",
            Category::Fact,
            Domain::Operational,
        )
        .with_owner("coach-7")
        .with_confidence(0.8)
        .with_link(Link::new("client-42", "configures", 0.9));
        backend.store(&record).await.unwrap();

        let results = backend
            .search(&BackendQuery::new("session duration"))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, Some(record.id.to_string()));
        assert_eq!(results[0].category, Some(Category::Fact));
        assert_eq!(results[0].attributes["owner_id"], json!("coach-7"));
        assert!(results[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn test_search_filters() {
        let backend = SqliteDocumentBackend::in_memory().unwrap();
        backend
            .store(&KnowledgeRecord::new("deploy checklist", Category::Procedure, Domain::Technical))
            .await
            .unwrap();
        backend
            .store(&KnowledgeRecord::new("deploy window", Category::Fact, Domain::Operational))
            .await
            .unwrap();

        let query = BackendQuery::new("deploy")
            .with_filters(SearchFilters::new().with_category(Category::Procedure));
        let results = backend.search(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "deploy checklist");
    }

    #[tokio::test]
    async fn test_replace_keeps_single_row() {
        let backend = SqliteDocumentBackend::in_memory().unwrap();
        let mut record = KnowledgeRecord::new("draft", Category::Fact, Domain::Operational);
        backend.store(&record).await.unwrap();
        record.content = "final".into();
        backend.store(&record).await.unwrap();
        assert_eq!(backend.count().await.unwrap(), 1);

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats["documents"], json!(1));
        assert_eq!(stats["schema_version"], json!(DOCUMENT_SCHEMA_VERSION));
    }

    #[tokio::test]
    async fn test_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.db");
        {
            let backend = SqliteDocumentBackend::open(&path).unwrap();
            backend
                .store(&KnowledgeRecord::new("persisted note", Category::Fact, Domain::Operational))
                .await
                .unwrap();
        }
        let backend = SqliteDocumentBackend::open(&path).unwrap();
        assert_eq!(backend.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_locked_database_respects_call_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.db");
        let backend = SqliteDocumentBackend::open(&path).unwrap();

        let locker = Connection::open(&path).unwrap();
        locker.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let record = KnowledgeRecord::new("blocked write", Category::Fact, Domain::Operational);
        let start = std::time::Instant::now();
        let result = bounded(Duration::from_millis(50), backend.store(&record)).await;

        assert!(matches!(result, Err(Error::Timeout { duration_ms: 50 })));
        assert!(start.elapsed() < Duration::from_secs(2));

        // Releasing the lock lets the pending write finish before shutdown
        drop(locker);
    }
}
