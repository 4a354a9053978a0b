//! Backend adapter contract.
//!
//! Every concrete store (semantic memory, graph, document) sits behind the
//! [`BackendAdapter`] trait and normalizes its rows into [`ResultItem`]s.
//! The orchestrators only ever talk to backends through a
//! [`BackendRegistry`].
//!
//! Two reference adapters ship with the crate:
//!
//! - [`InMemoryBackend`]: keyword-scoring store usable under any backend id,
//!   with switchable failure and latency for isolation testing
//! - [`SqliteDocumentBackend`]: a document backend on SQLite

mod memory;
mod sqlite;

pub use memory::InMemoryBackend;
pub use sqlite::{SqliteDocumentBackend, DOCUMENT_SCHEMA_VERSION};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::record::{Category, Domain, KnowledgeRecord};

/// Identifier of one concrete storage system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendId {
    #[serde(rename = "semantic-memory")]
    SemanticMemory,
    #[serde(rename = "graph-backend", alias = "graph")]
    Graph,
    #[serde(rename = "document-backend", alias = "document")]
    Document,
}

impl BackendId {
    pub const ALL: [BackendId; 3] = [BackendId::SemanticMemory, BackendId::Graph, BackendId::Document];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::SemanticMemory => "semantic-memory",
            BackendId::Graph => "graph-backend",
            BackendId::Document => "document-backend",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "semantic-memory" | "semantic_memory" | "memory" => Ok(BackendId::SemanticMemory),
            "graph-backend" | "graph" => Ok(BackendId::Graph),
            "document-backend" | "document" => Ok(BackendId::Document),
            other => Err(Error::UnknownBackend(other.to_string())),
        }
    }
}

/// Optional narrowing applied to searches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
}

impl SearchFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    /// Whether a stored record satisfies every filter that is set.
    pub fn matches_record(&self, record: &KnowledgeRecord) -> bool {
        self.category.map_or(true, |c| record.category == c)
            && self.domain.map_or(true, |d| record.domain == d)
            && self
                .owner_id
                .as_deref()
                .map_or(true, |o| record.owner_id.as_deref() == Some(o))
            && self
                .group_id
                .as_deref()
                .map_or(true, |g| record.group_id.as_deref() == Some(g))
            && self.min_confidence.map_or(true, |m| record.confidence >= m)
    }

    /// Whether a normalized result row satisfies the filters it can be checked against.
    ///
    /// Rows that omit a field are kept; backends are expected to have
    /// applied the filter natively where they could.
    pub fn matches_item(&self, item: &ResultItem) -> bool {
        let category_ok = match (self.category, item.category) {
            (Some(want), Some(have)) => want == have,
            _ => true,
        };
        let domain_ok = match (self.domain, item.attributes.get("domain").and_then(Value::as_str)) {
            (Some(want), Some(have)) => want.as_str() == have,
            _ => true,
        };
        let owner_ok = attribute_matches(item, "owner_id", self.owner_id.as_deref());
        let group_ok = attribute_matches(item, "group_id", self.group_id.as_deref());
        let confidence_ok = self.min_confidence.map_or(true, |m| item.confidence >= m);
        category_ok && domain_ok && owner_ok && group_ok && confidence_ok
    }
}

/// A wanted string attribute matches when the row omits it or carries the same value.
fn attribute_matches(item: &ResultItem, key: &str, want: Option<&str>) -> bool {
    match (want, item.attributes.get(key).and_then(Value::as_str)) {
        (Some(want), Some(have)) => want == have,
        _ => true,
    }
}

/// Query handed to each backend during fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendQuery {
    pub text: String,
    pub filters: SearchFilters,
    pub limit: usize,
}

impl BackendQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            filters: SearchFilters::default(),
            limit: 20,
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Lowercased alphanumeric query terms.
    pub fn terms(&self) -> Vec<String> {
        query_terms(&self.text)
    }
}

/// Split text into distinct lowercased alphanumeric terms of two or more characters.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
    {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// A normalized result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content: String,
    pub confidence: f64,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// Backend that produced this row; stamped by the read orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<BackendId>,
}

impl ResultItem {
    pub fn new(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: None,
            content: content.into(),
            confidence: crate::record::clamp_unit(confidence),
            attributes: HashMap::new(),
            timestamp: None,
            category: None,
            source: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Normalize a stored record into a result row.
    pub fn from_record(record: &KnowledgeRecord) -> Self {
        let mut attributes = record.attributes.clone();
        attributes.insert("domain".into(), Value::String(record.domain.to_string()));
        if let Some(owner) = &record.owner_id {
            attributes.insert("owner_id".into(), Value::String(owner.clone()));
        }
        if let Some(group) = &record.group_id {
            attributes.insert("group_id".into(), Value::String(group.clone()));
        }
        Self {
            id: Some(record.id.to_string()),
            content: record.content.clone(),
            confidence: record.confidence,
            attributes,
            timestamp: Some(record.created_at),
            category: Some(record.category),
            source: None,
        }
    }
}

/// Uniform contract over one concrete backend.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Which backend this adapter serves.
    fn id(&self) -> BackendId;

    /// Persist a record.
    async fn store(&self, record: &KnowledgeRecord) -> Result<()>;

    /// Run a query in the backend's native language and normalize the rows.
    async fn search(&self, query: &BackendQuery) -> Result<Vec<ResultItem>>;

    /// Backend-specific statistics.
    async fn stats(&self) -> Result<Value>;
}

/// Lookup table from backend id to adapter.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    adapters: BTreeMap<BackendId, Arc<dyn BackendAdapter>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own id, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn BackendAdapter>) -> &mut Self {
        self.adapters.insert(adapter.id(), adapter);
        self
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, id: BackendId) -> Result<Arc<dyn BackendAdapter>> {
        self.adapters
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::UnknownBackend(id.to_string()))
    }

    pub fn contains(&self, id: BackendId) -> bool {
        self.adapters.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<BackendId> {
        self.adapters.keys().copied().collect()
    }

    /// All adapters in backend-id order.
    pub fn all(&self) -> Vec<(BackendId, Arc<dyn BackendAdapter>)> {
        self.adapters
            .iter()
            .map(|(id, adapter)| (*id, Arc::clone(adapter)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backend_id_names() {
        assert_eq!(BackendId::SemanticMemory.to_string(), "semantic-memory");
        assert_eq!("graph".parse::<BackendId>().unwrap(), BackendId::Graph);
        assert!(matches!(
            "vector-db".parse::<BackendId>(),
            Err(Error::UnknownBackend(_))
        ));
        let parsed: BackendId = serde_json::from_str("\"document-backend\"").unwrap();
        assert_eq!(parsed, BackendId::Document);
    }

    #[test]
    fn test_query_terms() {
        let query = BackendQuery::new("OAuth debugging, a  OAuth!");
        assert_eq!(query.terms(), vec!["oauth", "debugging"]);
        assert!(query_terms("a b c").is_empty());
    }

    #[test]
    fn test_filters_match_item() {
        let item = ResultItem::new("x", 0.7)
            .with_category(Category::Fact)
            .with_attribute("domain", json!("technical"));

        assert!(SearchFilters::new().matches_item(&item));
        assert!(SearchFilters::new()
            .with_category(Category::Fact)
            .with_domain(Domain::Technical)
            .matches_item(&item));
        assert!(!SearchFilters::new()
            .with_category(Category::Insight)
            .matches_item(&item));
        assert!(!SearchFilters::new()
            .with_min_confidence(0.8)
            .matches_item(&item));
    }

    #[test]
    fn test_filters_check_owner_and_group() {
        let item = ResultItem::new("x", 0.7)
            .with_attribute("owner_id", json!("coach-1"))
            .with_attribute("group_id", json!("clinic"));

        assert!(SearchFilters::new()
            .with_owner("coach-1")
            .with_group("clinic")
            .matches_item(&item));
        assert!(!SearchFilters::new().with_owner("coach-2").matches_item(&item));
        assert!(!SearchFilters::new().with_group("other").matches_item(&item));

        // Rows without the attribute are left to the backend's own filtering
        assert!(SearchFilters::new()
            .with_owner("coach-2")
            .matches_item(&ResultItem::new("y", 0.7)));
    }

    #[test]
    fn test_result_item_from_record() {
        let record = KnowledgeRecord::new("Pinned fact", Category::Fact, Domain::Operational)
            .with_owner("coach-1")
            .with_confidence(0.8);
        let item = ResultItem::from_record(&record);
        assert_eq!(item.id, Some(record.id.to_string()));
        assert_eq!(item.category, Some(Category::Fact));
        assert_eq!(item.attributes["owner_id"], json!("coach-1"));
        assert_eq!(item.attributes["domain"], json!("operational"));
    }

    #[test]
    fn test_registry_unknown_backend() {
        let registry = BackendRegistry::new()
            .with_adapter(Arc::new(InMemoryBackend::new(BackendId::Graph)));
        assert!(registry.contains(BackendId::Graph));
        assert!(registry.get(BackendId::Graph).is_ok());
        assert!(matches!(
            registry.get(BackendId::Document),
            Err(Error::UnknownBackend(name)) if name == "document-backend"
        ));
    }
}
