//! Storage orchestration.
//!
//! [`StorageOrchestrator`] is the inbound surface. It owns the backend
//! registry, routing engine, classifier and tiered cache, and hands them to
//! the write and read paths:
//!
//! - **store**: classify (when no category is given), route, write the
//!   primary (together with its co-primary under a dual-primary rule), fan
//!   out to secondaries, write through to the cache and drop cached
//!   searches. Only a failed primary or an unknown backend aborts the call.
//! - **search**: serve from cache, or query every registered backend
//!   concurrently, merge, dedupe, rank and cache the response. A failing
//!   backend contributes nothing and is listed in the response.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_core::{BackendId, BackendRegistry, InMemoryBackend, StorageOrchestrator,
//!     StoreRequest, StrataConfig, SearchFilters, SearchOptions};
//!
//! let registry = BackendId::ALL.iter().fold(BackendRegistry::new(), |r, id| {
//!     r.with_adapter(Arc::new(InMemoryBackend::new(*id)))
//! });
//! let orchestrator = StorageOrchestrator::new(StrataConfig::default(), registry)?;
//!
//! let outcome = orchestrator.store(StoreRequest::new("Client prefers morning sessions"), None).await?;
//! let found = orchestrator
//!     .search("morning sessions", &SearchFilters::new(), &SearchOptions::new())
//!     .await?;
//! ```

mod fanout;
mod read;
mod write;

pub use fanout::{bounded, gather, partition, BackendFailure, BranchOutcome};
pub use read::{merge_results, rank_results, ReadOrchestrator, SearchOptions, SearchResponse};
pub use write::{CallerIdentity, StoreOutcome, StoreRequest, StoreTimings, WriteOrchestrator};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::backend::{BackendId, BackendRegistry, SearchFilters};
use crate::cache::{CacheStats, InvalidationResult, SharedCache, TieredCache};
use crate::classifier::Classifier;
use crate::config::StrataConfig;
use crate::error::{Error, Result};
use crate::record::{Category, Domain};
use crate::routing::{RoutingDecision, RoutingEngine, RoutingStats};

/// What a store would do, without doing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPreview {
    pub category: Category,
    pub domain: Domain,
    pub confidence: f64,
    pub tags: Vec<String>,
    pub decision: RoutingDecision,
}

/// Facade over the write and read paths.
pub struct StorageOrchestrator {
    registry: Arc<BackendRegistry>,
    router: Arc<RoutingEngine>,
    cache: Arc<TieredCache>,
    writer: WriteOrchestrator,
    reader: ReadOrchestrator,
    config: StrataConfig,
}

impl StorageOrchestrator {
    /// Build with a fast-tier-only cache.
    pub fn new(config: StrataConfig, registry: BackendRegistry) -> Result<Self> {
        Self::build(config, registry, None)
    }

    /// Build with a shared cache tier behind the fast tier.
    pub fn with_shared_cache(
        config: StrataConfig,
        registry: BackendRegistry,
        shared: Arc<dyn SharedCache>,
    ) -> Result<Self> {
        Self::build(config, registry, Some(shared))
    }

    fn build(
        config: StrataConfig,
        registry: BackendRegistry,
        shared: Option<Arc<dyn SharedCache>>,
    ) -> Result<Self> {
        let router = RoutingEngine::from_config(&config.routing)?;
        let missing: Vec<String> = router
            .referenced_backends()?
            .into_iter()
            .filter(|id| !registry.contains(*id))
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(Error::config(format!(
                "routing references unregistered backends: {}",
                missing.join(", ")
            )));
        }

        let classifier = match &config.classifier_rules {
            Some(specs) => Classifier::from_specs(specs)?,
            None => Classifier::new(),
        };

        let mut cache = TieredCache::new(config.cache.clone());
        if let Some(shared) = shared {
            cache = cache.with_shared(shared);
        }

        let registry = Arc::new(registry);
        let router = Arc::new(router);
        let cache = Arc::new(cache);
        let timeout = config.fanout.backend_timeout();

        let writer = WriteOrchestrator::new(
            registry.clone(),
            router.clone(),
            Arc::new(classifier),
            cache.clone(),
            timeout,
        );
        let reader = ReadOrchestrator::new(
            registry.clone(),
            cache.clone(),
            timeout,
            config.fanout.default_max_results,
            config.fanout.default_search_tier,
        );

        info!(
            backends = registry.len(),
            shared_cache = cache.has_shared_tier(),
            "storage orchestrator ready"
        );
        Ok(Self {
            registry,
            router,
            cache,
            writer,
            reader,
            config,
        })
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    /// The routing engine, for runtime rule changes.
    pub fn router(&self) -> &RoutingEngine {
        &self.router
    }

    // ===== Write Path =====

    pub async fn store(
        &self,
        request: StoreRequest,
        caller: Option<&CallerIdentity>,
    ) -> Result<StoreOutcome> {
        self.writer.store(request, caller).await
    }

    /// Classify and route without writing or counting.
    pub fn preview_routing(
        &self,
        request: &StoreRequest,
        caller: Option<&CallerIdentity>,
    ) -> Result<RoutingPreview> {
        let record = self.writer.prepare(request, caller)?;
        let mut decision = self.router.evaluate(&record, request.category)?;
        if let Some(tier) = request.cache_tier {
            decision.cache_tier = tier;
        }
        let tags = record.tags();
        Ok(RoutingPreview {
            category: record.category,
            domain: record.domain,
            confidence: record.confidence,
            tags,
            decision,
        })
    }

    // ===== Read Path =====

    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        self.reader.search(query, filters, options).await
    }

    // ===== Cache =====

    #[instrument(skip(self))]
    pub async fn invalidate_cache(&self, pattern: &str) -> Result<InvalidationResult> {
        self.cache.invalidate(pattern).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Start the periodic fast-tier sweep.
    pub fn spawn_cache_sweeper(&self) -> JoinHandle<()> {
        self.cache.spawn_sweeper()
    }

    // ===== Stats =====

    pub fn routing_stats(&self) -> Result<RoutingStats> {
        self.router.stats()
    }

    /// Adapter-reported statistics; unreachable backends report their error.
    pub async fn backend_stats(&self) -> BTreeMap<BackendId, Value> {
        let outcomes = gather(
            self.registry.all(),
            self.config.fanout.backend_timeout(),
            |adapter| async move { adapter.stats().await },
        )
        .await;
        outcomes
            .into_iter()
            .map(|o| {
                let value = o.result.unwrap_or_else(|e| json!({ "error": e.to_string() }));
                (o.backend, value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::cache::{CacheTier, InMemorySharedCache};
    use crate::routing::{RoutingConfig, RoutingRuleSpec};
    use pretty_assertions::assert_eq;

    struct Fixture {
        backends: BTreeMap<BackendId, Arc<InMemoryBackend>>,
        orchestrator: StorageOrchestrator,
    }

    fn fixture_with(config: StrataConfig) -> Fixture {
        let backends: BTreeMap<_, _> = BackendId::ALL
            .iter()
            .map(|id| (*id, Arc::new(InMemoryBackend::new(*id))))
            .collect();
        let registry = backends
            .values()
            .fold(BackendRegistry::new(), |r, b| r.with_adapter(b.clone()));
        let orchestrator = StorageOrchestrator::with_shared_cache(
            config,
            registry,
            Arc::new(InMemorySharedCache::new()),
        )
        .unwrap();
        Fixture {
            backends,
            orchestrator,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(StrataConfig::default())
    }

    #[tokio::test]
    async fn test_personal_memory_routes_hot() {
        let f = fixture();
        let outcome = f
            .orchestrator
            .store(
                StoreRequest::new("Client prefers morning coaching sessions")
                    .with_category(Category::ExperientialMemory)
                    .with_domain(Domain::Personal),
                Some(&CallerIdentity::new("coach-1")),
            )
            .await
            .unwrap();
        assert_eq!(outcome.decision.primary, BackendId::SemanticMemory);
        assert_eq!(outcome.decision.cache_tier, CacheTier::Hot);
        assert!(outcome
            .cache_key
            .unwrap()
            .as_str()
            .starts_with("record:coach-1:_:experiential-memory:"));
    }

    #[tokio::test]
    async fn test_inferred_fact_routes_to_document() {
        let f = fixture();
        let outcome = f
            .orchestrator
            .store(
                StoreRequest::new("Session configuration: duration 60min, weekly"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.decision.primary, BackendId::Document);
        assert!(f.backends[&BackendId::Document]
            .contains(&outcome.id.to_string())
            .await);
    }

    #[tokio::test]
    async fn test_search_survives_failing_backend_and_caches() {
        let f = fixture();
        f.orchestrator
            .store(
                StoreRequest::new("OAuth debugging: the refresh token was expired")
                    .with_domain(Domain::Technical),
                None,
            )
            .await
            .unwrap();
        f.backends[&BackendId::Graph].set_unavailable(true);

        let filters = SearchFilters::new();
        let first = f
            .orchestrator
            .search("OAuth debugging", &filters, &SearchOptions::new())
            .await
            .unwrap();
        assert!(!first.results.is_empty());
        assert!(!first.from_cache);
        assert_eq!(first.failed_backends.len(), 1);

        let second = f
            .orchestrator
            .search("OAuth debugging", &filters, &SearchOptions::new())
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.results.len(), first.results.len());
    }

    #[tokio::test]
    async fn test_store_refreshes_cached_search() {
        let f = fixture();
        let filters = SearchFilters::new();
        let before = f
            .orchestrator
            .search("morning coaching", &filters, &SearchOptions::new())
            .await
            .unwrap();
        assert_eq!(before.total, 0);

        f.orchestrator
            .store(
                StoreRequest::new("Client prefers morning coaching sessions")
                    .with_category(Category::ExperientialMemory),
                None,
            )
            .await
            .unwrap();

        let after = f
            .orchestrator
            .search("morning coaching", &filters, &SearchOptions::new())
            .await
            .unwrap();
        assert!(!after.from_cache);
        assert_eq!(after.total, 1);
    }

    #[tokio::test]
    async fn test_oversized_ttl_config_still_stores() {
        let config =
            StrataConfig::from_json_str(r#"{"cache":{"cold_ttl_secs":18446744073709551615}}"#)
                .unwrap();
        let f = fixture_with(config);
        let outcome = f
            .orchestrator
            .store(
                StoreRequest::new("Session configuration: duration 60min, weekly"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.decision.cache_tier, CacheTier::Cold);
        assert!(outcome.cached);
    }

    #[tokio::test]
    async fn test_stored_record_found_once_across_backends() {
        let f = fixture();
        let outcome = f
            .orchestrator
            .store(
                StoreRequest::new("Client prefers morning coaching sessions")
                    .with_category(Category::ExperientialMemory),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.backends_written.len(), 2);

        let response = f
            .orchestrator
            .search("morning coaching", &SearchFilters::new(), &SearchOptions::new())
            .await
            .unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.results[0].id, Some(outcome.id.to_string()));
    }

    #[tokio::test]
    async fn test_preview_has_no_side_effects() {
        let f = fixture();
        let preview = f
            .orchestrator
            .preview_routing(&StoreRequest::new("Session configuration: duration 60min, weekly"), None)
            .unwrap();
        assert_eq!(preview.category, Category::Fact);
        assert_eq!(preview.decision.primary, BackendId::Document);
        assert!(preview.tags.contains(&"temporal".to_string()));

        assert_eq!(f.orchestrator.routing_stats().unwrap().total_routed, 0);
        for backend in f.backends.values() {
            assert!(backend.is_empty().await);
        }
    }

    #[tokio::test]
    async fn test_invalidate_and_stats() {
        let f = fixture();
        let outcome = f
            .orchestrator
            .store(
                StoreRequest::new("Client prefers tea").with_owner("u1"),
                None,
            )
            .await
            .unwrap();
        assert!(outcome.cached);

        let stats = f.orchestrator.cache_stats().await;
        assert_eq!(stats.local.size, 1);
        assert_eq!(stats.shared.unwrap().size, 1);

        let removed = f.orchestrator.invalidate_cache("record:u1:*").await.unwrap();
        assert_eq!(removed.local_removed, 1);
        assert_eq!(removed.shared_removed, Some(1));

        let routing = f.orchestrator.routing_stats().unwrap();
        assert_eq!(routing.total_routed, 1);

        let backend_stats = f.orchestrator.backend_stats().await;
        assert_eq!(backend_stats.len(), 3);
        assert_eq!(backend_stats[&BackendId::SemanticMemory]["records"], 1);
    }

    #[tokio::test]
    async fn test_rejects_rules_for_unregistered_backends() {
        let registry = BackendRegistry::new()
            .with_adapter(Arc::new(InMemoryBackend::new(BackendId::SemanticMemory)));
        let err = StorageOrchestrator::new(StrataConfig::default(), registry)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("document-backend"));
    }

    #[tokio::test]
    async fn test_custom_rules_from_config() {
        let routing = RoutingConfig::default().with_rules(vec![RoutingRuleSpec::new(
            "everything-to-graph",
            1,
            BackendId::Graph,
        )
        .with_pattern(".")
        .with_secondary(vec![])]);
        let f = fixture_with(StrataConfig::default().with_routing(routing));

        let outcome = f
            .orchestrator
            .store(StoreRequest::new("anything at all"), None)
            .await
            .unwrap();
        assert_eq!(outcome.backends_written, vec![BackendId::Graph]);
        assert_eq!(f.orchestrator.router().rules().unwrap().len(), 1);
    }
}
