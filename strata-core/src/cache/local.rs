//! Process-local fast tier.

use glob::Pattern;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::tier::CacheTier;

/// Roughly thirty years; stands in for TTLs too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Expiry instant for a TTL starting now, saturating instead of overflowing.
pub(crate) fn expires_after(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Tier-tagged cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub expires_at: Instant,
    /// Tier the value was written for; `None` for raw TTL writes
    pub tier: Option<CacheTier>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>, ttl: Duration, tier: Option<CacheTier>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expires_at: expires_after(ttl),
            tier,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// TTL-bounded map with an entry cap.
pub struct LocalTier {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_entries: usize,
}

impl LocalTier {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Live value for `key`; expired entries are dropped on access.
    pub async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        None
    }

    /// Insert, evicting expired entries and then the soonest-to-expire one
    /// when the cap is reached.
    pub async fn set(&self, entry: CacheEntry) -> usize {
        let mut entries = self.entries.write().await;
        let mut evicted = 0;

        if !entries.contains_key(&entry.key) && entries.len() >= self.max_entries {
            let now = Instant::now();
            let before = entries.len();
            entries.retain(|_, e| !e.is_expired(now));
            evicted += before - entries.len();

            if entries.len() >= self.max_entries {
                let victim = entries
                    .values()
                    .min_by_key(|e| e.expires_at)
                    .map(|e| e.key.clone());
                if let Some(victim) = victim {
                    entries.remove(&victim);
                    evicted += 1;
                }
            }
        }

        entries.insert(entry.key.clone(), entry);
        evicted
    }

    /// Remove every key matching the glob pattern.
    pub async fn invalidate(&self, pattern: &Pattern) -> u64 {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !pattern.matches(key));
        (before - entries.len()) as u64
    }

    /// Drop expired entries.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    /// Stored entries, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Entries that have not expired.
    pub async fn live_len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Tier tag of a live entry.
    pub async fn tier_of(&self, key: &str) -> Option<CacheTier> {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.tier)
    }
}
