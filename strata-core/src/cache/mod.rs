//! Tiered caching.
//!
//! A process-local fast tier sits in front of an optional shared tier
//! reached through the [`SharedCache`] trait. Values are strings (callers
//! serialize to JSON); TTLs come from the [`CacheTier`] a value is written
//! for.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_core::cache::{CacheTier, TieredCache};
//! use strata_core::config::CacheConfig;
//!
//! let cache = TieredCache::new(CacheConfig::default());
//! cache.set_for_tier("record:_:_:fact:1", "{}", CacheTier::Cold).await;
//! assert!(cache.get("record:_:_:fact:1").await.is_some());
//! ```

mod key;
mod local;
mod shared;
mod tier;
mod tiered;

pub use key::{content_hash, normalize_query, CacheKey, SEARCH_KEY_PATTERN};
pub use local::{CacheEntry, LocalTier};
pub use shared::{InMemorySharedCache, SharedCache};
pub use tier::{CacheStats, CacheTier, TierStats};
pub use tiered::{InvalidationResult, TieredCache};
