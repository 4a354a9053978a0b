//! Runtime configuration.
//!
//! Everything has a working default; deployments override pieces through
//! the `with_*` builders, a JSON document, or `STRATA_*` environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::CacheTier;
use crate::classifier::CategoryRuleSpec;
use crate::error::{Error, Result};
use crate::routing::RoutingConfig;

/// Upper bound on the TTL of a shared-tier hit copied into the fast tier.
pub const MAX_PROMOTION_TTL: Duration = Duration::from_secs(5 * 60);

/// Tiered cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Fast-tier entry cap
    pub max_local_entries: usize,
    pub hot_ttl_secs: u64,
    pub warm_ttl_secs: u64,
    pub cold_ttl_secs: u64,
    /// TTL for promoted shared hits (capped at five minutes)
    pub promotion_ttl_secs: u64,
    /// Background sweep period for the fast tier
    pub sweep_interval_secs: u64,
    /// Bound on every shared-tier call
    pub shared_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_local_entries: 10_000,
            hot_ttl_secs: 5 * 60,
            warm_ttl_secs: 30 * 60,
            cold_ttl_secs: 60 * 60,
            promotion_ttl_secs: 5 * 60,
            sweep_interval_secs: 60,
            shared_timeout_ms: 250,
        }
    }
}

impl CacheConfig {
    pub fn with_max_local_entries(mut self, max: usize) -> Self {
        self.max_local_entries = max;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn with_shared_timeout(mut self, timeout: Duration) -> Self {
        self.shared_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_promotion_ttl(mut self, ttl: Duration) -> Self {
        self.promotion_ttl_secs = ttl.as_secs();
        self
    }

    /// TTL for a tier; `None` means the tier is never written.
    pub fn ttl_for(&self, tier: CacheTier) -> Option<Duration> {
        match tier {
            CacheTier::Hot => Some(Duration::from_secs(self.hot_ttl_secs)),
            CacheTier::Warm => Some(Duration::from_secs(self.warm_ttl_secs)),
            CacheTier::Cold => Some(Duration::from_secs(self.cold_ttl_secs)),
            CacheTier::Skip => None,
        }
    }

    pub fn promotion_ttl(&self) -> Duration {
        Duration::from_secs(self.promotion_ttl_secs).min(MAX_PROMOTION_TTL)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn shared_timeout(&self) -> Duration {
        Duration::from_millis(self.shared_timeout_ms)
    }
}

/// Fan-out settings for the write and read paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Bound on every backend call
    pub backend_timeout_ms: u64,
    /// Result limit when a search does not set one
    pub default_max_results: usize,
    /// Tier for search results when a search does not set one
    pub default_search_tier: CacheTier,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            backend_timeout_ms: 5_000,
            default_max_results: 20,
            default_search_tier: CacheTier::Warm,
        }
    }
}

impl FanoutConfig {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub cache: CacheConfig,
    pub fanout: FanoutConfig,
    pub routing: RoutingConfig,
    /// Replaces the built-in classifier table when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_rules: Option<Vec<CategoryRuleSpec>>,
}

impl StrataConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_classifier_rules(mut self, rules: Vec<CategoryRuleSpec>) -> Self {
        self.classifier_rules = Some(rules);
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.fanout.backend_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_default_max_results(mut self, max_results: usize) -> Self {
        self.fanout.default_max_results = max_results;
        self
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("invalid config: {e}")))
    }

    /// Defaults, or the JSON file named by `STRATA_CONFIG`, with individual
    /// `STRATA_*` variables applied on top.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("STRATA_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| Error::config(format!("cannot read {path}: {e}")))?;
                Self::from_json_str(&raw)?
            }
            Err(_) => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = parse_var(&lookup, "STRATA_BACKEND_TIMEOUT_MS")? {
            self.fanout.backend_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "STRATA_MAX_RESULTS")? {
            self.fanout.default_max_results = v;
        }
        if let Some(v) = parse_var(&lookup, "STRATA_SHARED_CACHE_TIMEOUT_MS")? {
            self.cache.shared_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "STRATA_MAX_LOCAL_ENTRIES")? {
            self.cache.max_local_entries = v;
        }
        if let Some(v) = parse_var(&lookup, "STRATA_CACHE_SWEEP_SECS")? {
            self.cache.sweep_interval_secs = v;
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::config(format!("{name} has invalid value {raw:?}"))),
        None => Ok(None),
    }
}
