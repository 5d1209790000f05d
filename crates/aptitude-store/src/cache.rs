//! In-process TTL cache keyed by string.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    cached_at: Instant,
}

/// Hit/miss counters and current size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// A read-through cache whose entries expire after a fixed TTL.
///
/// Expired entries are treated as absent and are evicted on the next
/// write. Every invalidation bumps a
/// generation counter; a fetch that began under an older generation does
/// not store its result.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone + Send + Sync> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh cached value for `key`, if any.
    pub async fn peek(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.cached_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    /// Return the cached value for `key`, or call `fetch` and cache its
    /// result. Errors are returned and never cached.
    pub async fn get<F, Fut>(&self, key: &str, fetch: F) -> anyhow::Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        if let Some(value) = self.peek(key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, "cache hit");
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key, "cache miss");

        let generation = self.generation.load(Ordering::SeqCst);
        let value = fetch().await?;
        self.store(key, value.clone(), generation).await;
        Ok(value)
    }

    async fn store(&self, key: &str, value: V, generation: u64) {
        let mut entries = self.entries.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(key, "discarding value fetched before invalidation");
            return;
        }
        let ttl = self.ttl;
        let before = entries.len();
        entries.retain(|_, e| e.cached_at.elapsed() < ttl);
        if entries.len() < before {
            tracing::debug!(evicted = before - entries.len(), "expired cache entries evicted");
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                cached_at: Instant::now(),
            },
        );
    }

    /// Remove entries whose key starts with `prefix`, or every entry when
    /// `prefix` is `None`. Returns the number of entries removed.
    pub async fn invalidate(&self, prefix: Option<&str>) -> usize {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        let before = entries.len();
        match prefix {
            Some(prefix) => entries.retain(|key, _| !key.starts_with(prefix)),
            None => entries.clear(),
        }
        let removed = before - entries.len();
        tracing::debug!(prefix = prefix.unwrap_or("*"), removed, "cache invalidated");
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().await.len(),
        }
    }
}

impl<V: Clone + Send + Sync> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn caches_successful_fetch() {
        let cache = TtlCache::<u32>::default();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let fetch = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        };

        assert_eq!(cache.get("k", fetch).await.unwrap(), 7);
        assert_eq!(cache.get("k", fetch).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = TtlCache::<u32>::default();
        let err = cache
            .get("k", || async { anyhow::bail!("backend down") })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("backend down"));
        assert!(cache.peek("k").await.is_none());
        assert_eq!(cache.get("k", || async { Ok(1) }).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_absent() {
        let cache = TtlCache::<u32>::new(Duration::from_secs(300));
        cache.get("k", || async { Ok(1) }).await.unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.peek("k").await, Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.peek("k").await, None);
        assert_eq!(cache.get("k", || async { Ok(2) }).await.unwrap(), 2);
        assert_eq!(cache.stats().await.entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_evicted_on_write() {
        let cache = TtlCache::<u32>::new(Duration::from_secs(300));
        for page in 0..500 {
            let key = format!("results:page={page}");
            cache.get(&key, || async { Ok(page) }).await.unwrap();
        }
        assert_eq!(cache.stats().await.entries, 500);

        tokio::time::advance(Duration::from_secs(3600)).await;
        cache.get("results:page=500", || async { Ok(500) }).await.unwrap();
        assert_eq!(cache.stats().await.entries, 1);
    }

    #[tokio::test]
    async fn invalidate_by_prefix() {
        let cache = TtlCache::<u32>::default();
        for key in ["results:a", "results:b", "subjects:a"] {
            cache.get(key, || async { Ok(1) }).await.unwrap();
        }

        assert_eq!(cache.invalidate(Some("results:")).await, 2);
        assert!(cache.peek("subjects:a").await.is_some());
        assert_eq!(cache.invalidate(None).await, 1);
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn get_after_invalidate_refetches() {
        let cache = TtlCache::<u32>::default();
        cache.get("k", || async { Ok(1) }).await.unwrap();
        cache.invalidate(Some("k")).await;
        assert_eq!(cache.get("k", || async { Ok(2) }).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stale_fetch_does_not_repopulate() {
        let cache = Arc::new(TtlCache::<u32>::default());
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let slow = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get("k", || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(1)
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        cache.invalidate(None).await;
        release_tx.send(()).unwrap();

        assert_eq!(slow.await.unwrap().unwrap(), 1);
        assert!(cache.peek("k").await.is_none());
    }
}
