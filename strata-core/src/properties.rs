//! Property-based tests for classification, routing and result merging.
//!
//! - Classification is deterministic and its confidence stays in [0.5, 0.9]
//! - A routing decision never lists its primary as a secondary
//! - Personal or owner-scoped records always land in the hot tier
//! - Merging leaves one row per identity, carrying the best confidence
