//! Two-tier cache: process-local fast tier in front of an optional shared tier.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::local::{CacheEntry, LocalTier};
use super::shared::SharedCache;
use super::tier::{CacheStats, CacheTier, TierStats};
use crate::config::CacheConfig;
use crate::error::{Error, Result};

/// Keys removed by an invalidation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationResult {
    pub local_removed: u64,
    /// `None` when the shared tier is absent or unreachable
    pub shared_removed: Option<u64>,
}

#[derive(Default)]
struct Counters {
    local_hits: AtomicU64,
    local_misses: AtomicU64,
    shared_hits: AtomicU64,
    shared_misses: AtomicU64,
    shared_errors: AtomicU64,
    promotions: AtomicU64,
}

/// Transparent get/set/invalidate over both tiers.
///
/// Reads check the fast tier, then the shared tier; a shared hit is promoted
/// into the fast tier with a TTL capped at five minutes. Writes go to both
/// tiers. The shared tier is best-effort: its failures and timeouts are
/// logged and counted, and the cache keeps working from the fast tier alone.
pub struct TieredCache {
    local: LocalTier,
    shared: Option<Arc<dyn SharedCache>>,
    config: CacheConfig,
    counters: Counters,
}

impl TieredCache {
    /// Fast tier only.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            local: LocalTier::new(config.max_local_entries),
            shared: None,
            config,
            counters: Counters::default(),
        }
    }

    /// Attach a shared tier.
    pub fn with_shared(mut self, shared: Arc<dyn SharedCache>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn has_shared_tier(&self) -> bool {
        self.shared.is_some()
    }

    /// Look a key up, fast tier first.
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.local.get(key).await {
            self.counters.local_hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }
        self.counters.local_misses.fetch_add(1, Ordering::Relaxed);

        let shared = self.shared.as_ref()?;
        match self.shared_call("get", shared.get(key)).await {
            Some(Some(value)) => {
                self.counters.shared_hits.fetch_add(1, Ordering::Relaxed);
                let ttl = self.config.promotion_ttl();
                self.local
                    .set(CacheEntry::new(key, value.clone(), ttl, None))
                    .await;
                self.counters.promotions.fetch_add(1, Ordering::Relaxed);
                debug!(key, ttl_secs = ttl.as_secs(), "promoted shared-tier hit");
                Some(value)
            }
            Some(None) => {
                self.counters.shared_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => None,
        }
    }

    /// Write to both tiers with an explicit TTL.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        self.write(key, value, ttl, None).await;
    }

    /// Write with the TTL of `tier`. Returns `false` for [`CacheTier::Skip`].
    pub async fn set_for_tier(&self, key: &str, value: &str, tier: CacheTier) -> bool {
        match self.config.ttl_for(tier) {
            Some(ttl) => {
                self.write(key, value, ttl, Some(tier)).await;
                true
            }
            None => false,
        }
    }

    async fn write(&self, key: &str, value: &str, ttl: Duration, tier: Option<CacheTier>) {
        let evicted = self.local.set(CacheEntry::new(key, value, ttl, tier)).await;
        if evicted > 0 {
            debug!(evicted, "fast tier at capacity");
        }
        if let Some(shared) = &self.shared {
            self.shared_call("set", shared.set(key, value, ttl)).await;
        }
    }

    /// Remove every key matching a glob pattern from both tiers.
    pub async fn invalidate(&self, pattern: &str) -> Result<InvalidationResult> {
        let compiled = Pattern::new(pattern)
            .map_err(|e| Error::config(format!("invalid invalidation pattern {pattern:?}: {e}")))?;

        let local_removed = self.local.invalidate(&compiled).await;
        let shared_removed = match &self.shared {
            Some(shared) => {
                self.shared_call("invalidate", shared.delete_matching(pattern))
                    .await
            }
            None => None,
        };

        debug!(pattern, local_removed, ?shared_removed, "cache invalidated");
        Ok(InvalidationResult {
            local_removed,
            shared_removed,
        })
    }

    /// Per-tier statistics.
    pub async fn stats(&self) -> CacheStats {
        let local = TierStats::new(
            self.counters.local_hits.load(Ordering::Relaxed),
            self.counters.local_misses.load(Ordering::Relaxed),
            self.local.live_len().await as u64,
        );

        let shared = match &self.shared {
            Some(shared) => {
                let size = self.shared_call("size", shared.size()).await.unwrap_or(0);
                Some(TierStats::new(
                    self.counters.shared_hits.load(Ordering::Relaxed),
                    self.counters.shared_misses.load(Ordering::Relaxed),
                    size,
                ))
            }
            None => None,
        };

        CacheStats {
            local,
            shared,
            shared_errors: self.counters.shared_errors.load(Ordering::Relaxed),
            promotions: self.counters.promotions.load(Ordering::Relaxed),
        }
    }

    /// Drop expired fast-tier entries now.
    pub async fn sweep(&self) -> usize {
        self.local.sweep().await
    }

    /// Periodically sweep the fast tier until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let period = self.config.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let evicted = cache.sweep().await;
                if evicted > 0 {
                    debug!(evicted, "swept expired fast-tier entries");
                }
            }
        })
    }

    /// Run a shared-tier call under the configured timeout, absorbing failures.
    async fn shared_call<T>(&self, op: &str, call: impl Future<Output = Result<T>>) -> Option<T> {
        let timeout = self.config.shared_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.counters.shared_errors.fetch_add(1, Ordering::Relaxed);
                warn!(op, error = %e, "shared cache tier failed; continuing with fast tier");
                None
            }
            Err(_) => {
                self.counters.shared_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    op,
                    timeout_ms = timeout.as_millis() as u64,
                    "shared cache tier timed out; continuing with fast tier"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::shared::InMemorySharedCache;
    use async_trait::async_trait;

    fn config() -> CacheConfig {
        CacheConfig::default()
    }

    struct StalledShared;

    #[async_trait]
    impl SharedCache for StalledShared {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            std::future::pending().await
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
            std::future::pending().await
        }
        async fn delete_matching(&self, _pattern: &str) -> Result<u64> {
            std::future::pending().await
        }
        async fn size(&self) -> Result<u64> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_roundtrip_then_expiry() {
        let cache = TieredCache::new(config());
        cache.set("k", "v", Duration::from_secs(10)).await;
        assert_eq!(cache.get("k").await, Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k").await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.local.hits, 1);
        assert_eq!(stats.local.misses, 1);
        assert!(stats.shared.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_size_counts_live_entries() {
        let cache = TieredCache::new(config());
        cache.set("short", "v", Duration::from_secs(1)).await;
        cache.set("long", "v", Duration::from_secs(600)).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.stats().await.local.size, 1);
    }

    #[tokio::test]
    async fn test_huge_ttls_do_not_panic() {
        let shared = Arc::new(InMemorySharedCache::new());
        let mut cfg = config();
        cfg.cold_ttl_secs = u64::MAX;
        let cache = TieredCache::new(cfg).with_shared(shared.clone());

        cache.set("raw", "v", Duration::MAX).await;
        assert!(cache.set_for_tier("cold", "v", CacheTier::Cold).await);
        assert_eq!(cache.get("raw").await, Some("v".to_string()));
        assert_eq!(cache.get("cold").await, Some("v".to_string()));
        assert_eq!(shared.size().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_skip_tier_writes_nothing() {
        let shared = Arc::new(InMemorySharedCache::new());
        let cache = TieredCache::new(config()).with_shared(shared.clone());
        assert!(!cache.set_for_tier("k", "v", CacheTier::Skip).await);
        assert_eq!(cache.get("k").await, None);
        assert_eq!(shared.size().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_hit_promoted_with_capped_ttl() {
        let shared = Arc::new(InMemorySharedCache::new());
        shared
            .set("k", "from-peer", Duration::from_secs(3600))
            .await
            .unwrap();

        let cache = TieredCache::new(config()).with_shared(shared.clone());
        assert_eq!(cache.get("k").await, Some("from-peer".to_string()));

        // Second read is served locally
        assert_eq!(cache.get("k").await, Some("from-peer".to_string()));
        let stats = cache.stats().await;
        assert_eq!(stats.local.hits, 1);
        assert_eq!(stats.shared.as_ref().unwrap().hits, 1);
        assert_eq!(stats.promotions, 1);

        // Promoted copy expires after the cap even though the shared copy lives on
        tokio::time::advance(Duration::from_secs(301)).await;
        shared.set_unavailable(true);
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_unavailable_shared_tier_degrades() {
        let shared = Arc::new(InMemorySharedCache::new());
        shared.set_unavailable(true);
        let cache = TieredCache::new(config()).with_shared(shared);

        assert!(cache.set_for_tier("k", "v", CacheTier::Warm).await);
        assert_eq!(cache.get("k").await, Some("v".to_string()));
        assert_eq!(cache.get("missing").await, None);

        let result = cache.invalidate("k").await.unwrap();
        assert_eq!(result.local_removed, 1);
        assert_eq!(result.shared_removed, None);

        let stats = cache.stats().await;
        assert!(stats.shared_errors >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_shared_tier_times_out() {
        let cache = TieredCache::new(config()).with_shared(Arc::new(StalledShared));
        cache.set("k", "v", Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some("v".to_string()));
        assert_eq!(cache.get("other").await, None);
        assert_eq!(cache.stats().await.shared_errors, 3);
    }

    #[tokio::test]
    async fn test_invalidate_both_tiers() {
        let shared = Arc::new(InMemorySharedCache::new());
        let cache = TieredCache::new(config()).with_shared(shared.clone());
        cache.set_for_tier("search:a", "1", CacheTier::Warm).await;
        cache.set_for_tier("record:x", "2", CacheTier::Cold).await;

        let result = cache.invalidate("search:*").await.unwrap();
        assert_eq!(result.local_removed, 1);
        assert_eq!(result.shared_removed, Some(1));
        assert_eq!(cache.get("record:x").await, Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_pattern_rejected() {
        let cache = TieredCache::new(config());
        assert!(matches!(cache.invalidate("[").await, Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_expired() {
        let cache = Arc::new(TieredCache::new(
            CacheConfig::default().with_sweep_interval(Duration::from_secs(1)),
        ));
        cache.set("k", "v", Duration::from_millis(500)).await;
        let handle = cache.spawn_sweeper();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(cache.stats().await.local.size, 0);

        drop(cache);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
    }
}
