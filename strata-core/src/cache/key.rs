//! Deterministic cache key derivation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::backend::SearchFilters;
use crate::record::KnowledgeRecord;

/// Glob matching every cached search response.
pub const SEARCH_KEY_PATTERN: &str = "search:*";

/// Cache key derived from logical identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Key for a stored record: `record:{owner}:{group}:{category}:{id}`.
    pub fn for_record(record: &KnowledgeRecord) -> Self {
        CacheKey(format!(
            "record:{}:{}:{}:{}",
            record.owner_id.as_deref().unwrap_or("_"),
            record.group_id.as_deref().unwrap_or("_"),
            record.category,
            record.id
        ))
    }

    /// Key for a search: `search:{sha256}` over the normalized query,
    /// filters and result limit.
    pub fn for_search(query: &str, filters: &SearchFilters, max_results: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"query:");
        hasher.update(normalize_query(query).as_bytes());
        hasher.update(b"\nfilters:");
        // Struct fields serialize in declaration order, so this is stable
        hasher.update(serde_json::to_string(filters).unwrap_or_default().as_bytes());
        hasher.update(format!("\nlimit:{max_results}").as_bytes());
        CacheKey(format!("search:{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase and collapse whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 of content, hex encoded.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
