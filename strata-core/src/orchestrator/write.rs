//! Store path: classify, route, write primary, fan out secondaries, cache.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::fanout::{gather, partition, BackendFailure};
use crate::backend::{BackendAdapter, BackendId, BackendRegistry};
use crate::cache::{CacheKey, CacheTier, TieredCache, SEARCH_KEY_PATTERN};
use crate::classifier::{Classifier, ClassifyHint};
use crate::error::{Error, Result};
use crate::record::{Category, Domain, KnowledgeRecord, Link, RecordId};
use crate::routing::{RoutingDecision, RoutingEngine};

/// Identity of the caller, stamped into `owner_id` when a request has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub id: String,
}

impl CallerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Inbound store request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub content: String,
    /// Inferred by the classifier when absent
    #[serde(default)]
    pub category: Option<Category>,
    /// Inferred by the classifier when absent
    #[serde(default)]
    pub domain: Option<Domain>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    /// Classifier confidence is used when absent
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub links: Vec<Link>,
    /// Overrides the routed cache tier
    #[serde(default)]
    pub cache_tier: Option<CacheTier>,
}

impl StoreRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
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

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_cache_tier(mut self, tier: CacheTier) -> Self {
        self.cache_tier = Some(tier);
        self
    }
}

/// Wall-clock breakdown of a store, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreTimings {
    pub primary_ms: u64,
    pub secondary_ms: u64,
    pub total_ms: u64,
}

/// Result of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreOutcome {
    pub id: RecordId,
    pub decision: RoutingDecision,
    /// Authoritative backends that succeeded, then secondaries that succeeded
    pub backends_written: Vec<BackendId>,
    /// Authoritative writes that failed while their dual-primary partner succeeded
    #[serde(default)]
    pub failed_primaries: Vec<BackendFailure>,
    /// Best-effort secondaries that failed
    pub failed_backends: Vec<BackendFailure>,
    pub cached: bool,
    /// `None` when the record was not cached
    pub cache_key: Option<CacheKey>,
    pub timings: StoreTimings,
}

impl StoreOutcome {
    /// Whether every routed backend accepted the write.
    pub fn is_complete(&self) -> bool {
        self.failed_primaries.is_empty() && self.failed_backends.is_empty()
    }
}

/// Drives the write path.
pub struct WriteOrchestrator {
    registry: Arc<BackendRegistry>,
    router: Arc<RoutingEngine>,
    classifier: Arc<Classifier>,
    cache: Arc<TieredCache>,
    backend_timeout: Duration,
}

impl WriteOrchestrator {
    pub fn new(
        registry: Arc<BackendRegistry>,
        router: Arc<RoutingEngine>,
        classifier: Arc<Classifier>,
        cache: Arc<TieredCache>,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            router,
            classifier,
            cache,
            backend_timeout,
        }
    }

    /// Classify a request and build the record it describes.
    pub fn prepare(
        &self,
        request: &StoreRequest,
        caller: Option<&CallerIdentity>,
    ) -> Result<KnowledgeRecord> {
        let hint = ClassifyHint {
            category: request.category,
            domain: request.domain,
        };
        let classification = self.classifier.classify(&request.content, Some(&hint))?;

        let mut record = KnowledgeRecord::new(
            request.content.clone(),
            classification.category,
            classification.domain,
        )
        .with_confidence(request.confidence.unwrap_or(classification.confidence));
        record.attributes = request.attributes.clone();
        record.links = request.links.clone();
        record.owner_id = request
            .owner_id
            .clone()
            .or_else(|| caller.map(|c| c.id.clone()));
        record.group_id = request.group_id.clone();

        if !classification.tags.is_empty() && !record.attributes.contains_key("tags") {
            record.attributes.insert(
                "tags".into(),
                Value::Array(classification.tags.into_iter().map(Value::String).collect()),
            );
        }
        Ok(record)
    }

    #[instrument(skip(self, request, caller), fields(category = ?request.category))]
    pub async fn store(
        &self,
        request: StoreRequest,
        caller: Option<&CallerIdentity>,
    ) -> Result<StoreOutcome> {
        let start = Instant::now();
        let record = self.prepare(&request, caller)?;

        let mut decision = self.router.route(&record, request.category)?;
        if let Some(tier) = request.cache_tier {
            decision.cache_tier = tier;
        }

        // Resolve everything up front so an unknown backend fails before any write
        let authoritative = self.resolve(&decision.authoritative())?;
        let secondaries = self.resolve(decision.best_effort())?;

        // Dual-primary partners are written together and both always attempted
        let primary_start = Instant::now();
        let outcomes = gather(authoritative, self.backend_timeout, |adapter| {
            let record = record.clone();
            async move { adapter.store(&record).await }
        })
        .await;
        let primary_ms = primary_start.elapsed().as_millis() as u64;

        let (succeeded, failed) = partition(outcomes);
        if succeeded.is_empty() {
            let error = failed
                .into_iter()
                .find(|(backend, _)| *backend == decision.primary)
                .map(|(_, e)| e)
                .unwrap_or_else(|| Error::Internal("primary write produced no outcome".into()));
            warn!(backend = %decision.primary, error = %error, "primary write failed");
            return Err(Error::primary_write(decision.primary.as_str(), error));
        }
        let mut backends_written: Vec<BackendId> = succeeded.into_iter().map(|(id, ())| id).collect();
        let failed_primaries: Vec<BackendFailure> = failed
            .into_iter()
            .map(|(backend, e)| {
                warn!(%backend, error = %e, "dual-primary write failed, partner succeeded");
                BackendFailure {
                    backend,
                    error: e.to_string(),
                }
            })
            .collect();

        let secondary_start = Instant::now();
        let outcomes = gather(secondaries, self.backend_timeout, |adapter| {
            let record = record.clone();
            async move { adapter.store(&record).await }
        })
        .await;
        let secondary_ms = secondary_start.elapsed().as_millis() as u64;

        let (succeeded, failed) = partition(outcomes);
        backends_written.extend(succeeded.into_iter().map(|(id, ())| id));

        let failed_backends: Vec<BackendFailure> = failed
            .into_iter()
            .map(|(backend, e)| {
                warn!(%backend, error = %e, "secondary write failed");
                BackendFailure {
                    backend,
                    error: e.to_string(),
                }
            })
            .collect();

        let (cached, cache_key) = self.write_through(&record, decision.cache_tier).await?;
        // Cached search responses may now be missing this record
        self.cache.invalidate(SEARCH_KEY_PATTERN).await?;

        let timings = StoreTimings {
            primary_ms,
            secondary_ms,
            total_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            id = %record.id,
            primary = %decision.primary,
            written = backends_written.len(),
            failed = failed_primaries.len() + failed_backends.len(),
            tier = %decision.cache_tier,
            "stored record"
        );

        Ok(StoreOutcome {
            id: record.id,
            decision,
            backends_written,
            failed_primaries,
            failed_backends,
            cached,
            cache_key,
            timings,
        })
    }

    fn resolve(&self, ids: &[BackendId]) -> Result<Vec<(BackendId, Arc<dyn BackendAdapter>)>> {
        ids.iter()
            .map(|id| self.registry.get(*id).map(|adapter| (*id, adapter)))
            .collect()
    }

    async fn write_through(
        &self,
        record: &KnowledgeRecord,
        tier: CacheTier,
    ) -> Result<(bool, Option<CacheKey>)> {
        if tier == CacheTier::Skip {
            debug!(id = %record.id, "cache write skipped");
            return Ok((false, None));
        }
        let key = CacheKey::for_record(record);
        let payload = serde_json::to_string(record)?;
        let cached = self.cache.set_for_tier(key.as_str(), &payload, tier).await;
        Ok((cached, cached.then_some(key)))
    }
}
