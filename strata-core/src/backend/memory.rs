//! In-process reference backend.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{BackendAdapter, BackendId, BackendQuery, ResultItem};
use crate::error::{Error, Result};
use crate::record::KnowledgeRecord;

/// Keyword-scoring store that can stand in for any backend.
///
/// Records are upserted by id. A search returns every record sharing at
/// least one query term with its content, best term coverage first. The
/// backend can be switched unavailable or given artificial latency, which
/// is how fan-out isolation and timeouts are exercised in tests.
pub struct InMemoryBackend {
    id: BackendId,
    records: RwLock<Vec<KnowledgeRecord>>,
    unavailable: AtomicBool,
    latency: Option<Duration>,
    writes: AtomicU64,
    searches: AtomicU64,
}

impl InMemoryBackend {
    pub fn new(id: BackendId) -> Self {
        Self {
            id,
            records: RwLock::new(Vec::new()),
            unavailable: AtomicBool::new(false),
            latency: None,
            writes: AtomicU64::new(0),
            searches: AtomicU64::new(0),
        }
    }

    /// Delay every store and search by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every call fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of records held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Whether a record with this id is held.
    pub async fn contains(&self, id: &str) -> bool {
        self.records
            .read()
            .await
            .iter()
            .any(|r| r.id.to_string() == id)
    }

    async fn simulate(&self, operation: &str) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::backend(
                self.id.as_str(),
                format!("{operation} failed: backend unavailable"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BackendAdapter for InMemoryBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    async fn store(&self, record: &KnowledgeRecord) -> Result<()> {
        self.simulate("store").await?;

        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn search(&self, query: &BackendQuery) -> Result<Vec<ResultItem>> {
        self.simulate("search").await?;
        self.searches.fetch_add(1, Ordering::Relaxed);

        let terms = query.terms();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.records.read().await;
        let mut scored: Vec<(f64, &KnowledgeRecord)> = records
            .iter()
            .filter(|r| query.filters.matches_record(r))
            .filter_map(|r| {
                let content = r.content.to_lowercase();
                let hits = terms.iter().filter(|t| content.contains(t.as_str())).count();
                (hits > 0).then(|| (hits as f64 / terms.len() as f64, r))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
        });

        Ok(scored
            .into_iter()
            .take(query.limit)
            .map(|(coverage, record)| {
                ResultItem::from_record(record).with_attribute("term_coverage", json!(coverage))
            })
            .collect())
    }

    async fn stats(&self) -> Result<Value> {
        self.simulate("stats").await?;
        Ok(json!({
            "backend": self.id.as_str(),
            "records": self.records.read().await.len(),
            "writes": self.writes.load(Ordering::Relaxed),
            "searches": self.searches.load(Ordering::Relaxed),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SearchFilters;
    use crate::record::{Category, Domain};

    fn record(content: &str) -> KnowledgeRecord {
        KnowledgeRecord::new(content, Category::Fact, Domain::Technical)
    }

    #[tokio::test]
    async fn test_store_and_search() {
        let backend = InMemoryBackend::new(BackendId::SemanticMemory);
        backend.store(&record("OAuth token refresh bug")).await.unwrap();
        backend.store(&record("Weekly coaching cadence")).await.unwrap();

        let results = backend
            .search(&BackendQuery::new("oauth debugging"))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "OAuth token refresh bug");
        assert_eq!(results[0].attributes["term_coverage"], json!(0.5));
    }

    #[tokio::test]
    async fn test_store_upserts_by_id() {
        let backend = InMemoryBackend::new(BackendId::Document);
        let mut rec = record("first version");
        backend.store(&rec).await.unwrap();
        rec.content = "second version".into();
        backend.store(&rec).await.unwrap();

        assert_eq!(backend.len().await, 1);
        let results = backend.search(&BackendQuery::new("version")).await.unwrap();
        assert_eq!(results[0].content, "second version");
    }

    #[tokio::test]
    async fn test_filters_applied() {
        let backend = InMemoryBackend::new(BackendId::Graph);
        backend
            .store(&record("shared term").with_owner("alice"))
            .await
            .unwrap();
        backend
            .store(&record("shared term").with_owner("bob"))
            .await
            .unwrap();

        let query = BackendQuery::new("shared").with_filters(SearchFilters::new().with_owner("bob"));
        let results = backend.search(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].attributes["owner_id"], json!("bob"));
    }

    #[tokio::test]
    async fn test_unavailable_backend_errors() {
        let backend = InMemoryBackend::new(BackendId::Graph);
        backend.set_unavailable(true);
        assert!(backend.store(&record("x")).await.is_err());
        assert!(backend.search(&BackendQuery::new("x")).await.is_err());

        backend.set_unavailable(false);
        assert!(backend.store(&record("xy")).await.is_ok());
        let stats = backend.stats().await.unwrap();
        assert_eq!(stats["records"], json!(1));
        assert_eq!(stats["backend"], json!("graph-backend"));
    }
}
