//! Search path: cache lookup, concurrent fan-out, merge, rank, cache.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::fanout::{gather, partition, BackendFailure};
use crate::backend::{query_terms, BackendId, BackendQuery, BackendRegistry, ResultItem, SearchFilters};
use crate::cache::{content_hash, CacheKey, CacheTier, TieredCache};
use crate::error::{Error, Result};

/// Per-search knobs. Unset fields fall back to configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    #[serde(default)]
    pub max_results: Option<usize>,
    /// Bypass the cache read; results are still written back
    #[serde(default)]
    pub realtime: bool,
    /// Tier for caching the response; `skip` disables the write
    #[serde(default)]
    pub cache_tier: Option<CacheTier>,
    /// Per-backend timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }

    pub fn with_cache_tier(mut self, tier: CacheTier) -> Self {
        self.cache_tier = Some(tier);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}

/// Merged search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<ResultItem>,
    /// Distinct matches before truncation
    pub total: usize,
    pub from_cache: bool,
    /// Rows each backend returned; zero for failed backends
    pub per_backend_counts: BTreeMap<BackendId, usize>,
    pub failed_backends: Vec<BackendFailure>,
}

/// Drives the read path.
pub struct ReadOrchestrator {
    registry: Arc<BackendRegistry>,
    cache: Arc<TieredCache>,
    backend_timeout: Duration,
    default_max_results: usize,
    default_tier: CacheTier,
}

impl ReadOrchestrator {
    pub fn new(
        registry: Arc<BackendRegistry>,
        cache: Arc<TieredCache>,
        backend_timeout: Duration,
        default_max_results: usize,
        default_tier: CacheTier,
    ) -> Self {
        Self {
            registry,
            cache,
            backend_timeout,
            default_max_results,
            default_tier,
        }
    }

    #[instrument(skip(self, filters, options), fields(realtime = options.realtime))]
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(Error::InvalidQuery("query must not be empty".into()));
        }

        let max_results = options.max_results.unwrap_or(self.default_max_results);
        let key = CacheKey::for_search(query, filters, max_results);

        if !options.realtime {
            if let Some(cached) = self.cached_response(&key).await {
                debug!(key = %key, "search served from cache");
                return Ok(cached);
            }
        }

        let timeout = options
            .timeout_ms
            .map_or(self.backend_timeout, Duration::from_millis);
        let backend_query = BackendQuery::new(query)
            .with_filters(filters.clone())
            .with_limit(max_results);

        let outcomes = gather(self.registry.all(), timeout, |adapter| {
            let backend_query = backend_query.clone();
            async move { adapter.search(&backend_query).await }
        })
        .await;
        let (succeeded, failed) = partition(outcomes);

        let mut per_backend_counts = BTreeMap::new();
        let mut rows = Vec::new();
        for (backend, items) in succeeded {
            per_backend_counts.insert(backend, items.len());
            rows.extend(items.into_iter().map(|mut item| {
                item.source = Some(backend);
                item
            }));
        }
        let failed_backends: Vec<BackendFailure> = failed
            .into_iter()
            .map(|(backend, e)| {
                warn!(%backend, error = %e, "backend search failed");
                per_backend_counts.insert(backend, 0);
                BackendFailure {
                    backend,
                    error: e.to_string(),
                }
            })
            .collect();

        let mut results = merge_results(rows);
        results.retain(|item| filters.matches_item(item));
        rank_results(&mut results, query);
        let total = results.len();
        results.truncate(max_results);

        let response = SearchResponse {
            results,
            total,
            from_cache: false,
            per_backend_counts,
            failed_backends,
        };

        let tier = options.cache_tier.unwrap_or(self.default_tier);
        if tier != CacheTier::Skip {
            let payload = serde_json::to_string(&response)?;
            self.cache.set_for_tier(key.as_str(), &payload, tier).await;
        }

        info!(
            total = response.total,
            returned = response.results.len(),
            failed = response.failed_backends.len(),
            "search complete"
        );
        Ok(response)
    }

    async fn cached_response(&self, key: &CacheKey) -> Option<SearchResponse> {
        let payload = self.cache.get(key.as_str()).await?;
        match serde_json::from_str::<SearchResponse>(&payload) {
            Ok(mut response) => {
                response.from_cache = true;
                Some(response)
            }
            Err(e) => {
                debug!(key = %key, error = %e, "discarding unreadable cached search");
                None
            }
        }
    }
}

/// Identity used for duplicate suppression.
fn dedupe_key(item: &ResultItem) -> String {
    match &item.id {
        Some(id) => format!("id:{id}"),
        None => format!("sha256:{}", content_hash(&item.content)),
    }
}

/// Collapse duplicates, keeping the higher-confidence copy. First-seen order is kept.
pub fn merge_results(rows: Vec<ResultItem>) -> Vec<ResultItem> {
    let mut merged: Vec<ResultItem> = Vec::with_capacity(rows.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for item in rows {
        let key = dedupe_key(&item);
        match index.get(&key) {
            Some(&at) => {
                if item.confidence > merged[at].confidence {
                    merged[at] = item;
                }
            }
            None => {
                index.insert(key, merged.len());
                merged.push(item);
            }
        }
    }
    merged
}

/// Order by 0.1-wide confidence band, then query-term overlap, then confidence.
pub fn rank_results(results: &mut [ResultItem], query: &str) {
    let terms = query_terms(query);
    let overlap = |item: &ResultItem| {
        let content = item.content.to_lowercase();
        terms.iter().filter(|t| content.contains(t.as_str())).count()
    };
    let band = |item: &ResultItem| (item.confidence * 10.0).floor() as i64;

    results.sort_by(|a, b| {
        band(b)
            .cmp(&band(a))
            .then_with(|| overlap(b).cmp(&overlap(a)))
            .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal))
    });
}
