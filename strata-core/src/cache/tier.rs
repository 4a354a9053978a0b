//! Cache tiers and per-tier statistics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How aggressively a value is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Short-lived, frequently re-read (5 minutes)
    Hot,
    /// Default for memories and insights (30 minutes)
    Warm,
    /// Long-lived reference content (60 minutes)
    Cold,
    /// Never written to either tier
    Skip,
}

impl CacheTier {
    /// Built-in TTL, `None` for [`CacheTier::Skip`].
    pub fn default_ttl(&self) -> Option<Duration> {
        match self {
            CacheTier::Hot => Some(Duration::from_secs(5 * 60)),
            CacheTier::Warm => Some(Duration::from_secs(30 * 60)),
            CacheTier::Cold => Some(Duration::from_secs(60 * 60)),
            CacheTier::Skip => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Hot => "hot",
            CacheTier::Warm => "warm",
            CacheTier::Cold => "cold",
            CacheTier::Skip => "skip",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hit/miss counters for one cache tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    /// Number of live entries
    pub size: u64,
    pub hit_rate: f64,
}

impl TierStats {
    pub fn new(hits: u64, misses: u64, size: u64) -> Self {
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        Self {
            hits,
            misses,
            size,
            hit_rate,
        }
    }
}

/// Snapshot of both tiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub local: TierStats,
    /// `None` when no shared tier is configured
    pub shared: Option<TierStats>,
    /// Shared-tier calls that failed or timed out
    pub shared_errors: u64,
    /// Shared hits copied into the local tier
    pub promotions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ttls() {
        assert_eq!(CacheTier::Hot.default_ttl(), Some(Duration::from_secs(300)));
        assert_eq!(CacheTier::Warm.default_ttl(), Some(Duration::from_secs(1800)));
        assert_eq!(CacheTier::Cold.default_ttl(), Some(Duration::from_secs(3600)));
        assert_eq!(CacheTier::Skip.default_ttl(), None);
    }

    #[test]
    fn test_hit_rate() {
        assert_eq!(TierStats::new(0, 0, 0).hit_rate, 0.0);
        let stats = TierStats::new(2, 1, 5);
        assert!((stats.hit_rate - 0.667).abs() < 0.01);
    }

    #[test]
    fn test_tier_serde() {
        assert_eq!(serde_json::to_string(&CacheTier::Skip).unwrap(), "\"skip\"");
        let tier: CacheTier = serde_json::from_str("\"hot\"").unwrap();
        assert_eq!(tier, CacheTier::Hot);
    }
}
