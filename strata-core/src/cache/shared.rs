//! Shared (cross-process) cache tier contract.

use async_trait::async_trait;
use glob::Pattern;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::local::expires_after;
use crate::error::{Error, Result};

/// String-keyed external cache shared across process instances.
///
/// Implementations wrap a distributed cache client. The tiered cache treats
/// every error from this trait as best-effort and never surfaces it.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete every key matching a glob pattern, returning how many were removed.
    async fn delete_matching(&self, pattern: &str) -> Result<u64>;

    /// Number of live keys.
    async fn size(&self) -> Result<u64>;
}

/// In-process stand-in for a distributed cache.
///
/// Useful for single-node deployments and tests; it can be switched
/// unavailable to exercise degraded operation.
#[derive(Default)]
pub struct InMemorySharedCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    unavailable: AtomicBool,
}

impl InMemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::Cache("shared cache unreachable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SharedCache for InMemorySharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|(_, expires_at)| now < *expires_at)
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check()?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), expires_after(ttl)));
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        self.check()?;
        let pattern = Pattern::new(pattern)
            .map_err(|e| Error::Cache(format!("invalid pattern {pattern:?}: {e}")))?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !pattern.matches(key));
        Ok((before - entries.len()) as u64)
    }

    async fn size(&self) -> Result<u64> {
        self.check()?;
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|(_, expires_at)| now < *expires_at)
            .count() as u64)
    }
}
