//! # strata-core
//!
//! Storage routing and tiered caching for knowledge records.
//!
//! A record written through the orchestrator is classified, routed to a
//! primary backend plus secondaries, and cached in a tier chosen from its
//! domain, category and confidence. Searches fan out to every backend
//! concurrently and merge the results.
//!
//! ## Core Components
//!
//! - **Classifier**: content category, confidence, tags and domain from a regex rule table
//! - **Routing**: ordered rules mapping a record to backends and a cache tier
//! - **Cache**: process-local fast tier over an optional shared tier
//! - **Orchestrator**: store and search paths with partial-failure isolation
//! - **Backend**: adapter trait plus in-memory and SQLite implementations
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_core::Classifier;
//!
//! let classification = Classifier::new().classify("Client prefers morning sessions", None)?;
//! println!("{} ({:.2})", classification.category, classification.confidence);
//! ```

pub mod backend;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod record;
pub mod routing;

mod properties;

// Re-exports for convenience
pub use backend::{
    BackendAdapter, BackendId, BackendQuery, BackendRegistry, InMemoryBackend, ResultItem,
    SearchFilters, SqliteDocumentBackend,
};
pub use cache::{
    CacheKey, CacheStats, CacheTier, InMemorySharedCache, InvalidationResult, SharedCache,
    TieredCache,
};
pub use classifier::{Classification, Classifier, ClassifyHint};
pub use config::{CacheConfig, FanoutConfig, StrataConfig};
pub use error::{Error, Result};
pub use orchestrator::{
    BackendFailure, CallerIdentity, RoutingPreview, SearchOptions, SearchResponse,
    StorageOrchestrator, StoreOutcome, StoreRequest,
};
pub use record::{Category, Domain, KnowledgeRecord, Link, RecordId};
pub use routing::{RoutingConfig, RoutingDecision, RoutingEngine, RoutingRuleSpec, RoutingStats};
