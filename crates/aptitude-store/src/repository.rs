//! Caching façade over a [`DataService`].
//!
//! Reads go through a TTL cache. Every write invalidates the written
//! table and any dependent key prefixes before returning, whether or not
//! the write succeeded.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use aptitude_core::traits::{tables, DataService, Filter, Row};

use crate::cache::{CacheStats, TtlCache};

/// Key prefix for cached `lookup` results.
pub const RPC_PREFIX: &str = "rpc:";
/// Key prefix for cached aggregate counters.
pub const STATS_PREFIX: &str = "stats:";

fn table_prefix(table: &str) -> String {
    format!("{table}:")
}

/// Read-through, write-invalidating cache in front of a data service.
pub struct CachingRepository {
    inner: Arc<dyn DataService>,
    cache: TtlCache<Value>,
    dependents: HashMap<String, Vec<String>>,
}

impl CachingRepository {
    pub fn new(inner: Arc<dyn DataService>, ttl: Duration) -> Self {
        let dependents = HashMap::from([
            (
                tables::SUBJECTS.to_string(),
                vec![RPC_PREFIX.to_string(), STATS_PREFIX.to_string()],
            ),
            (tables::RESULTS.to_string(), vec![STATS_PREFIX.to_string()]),
            (tables::REPORTS.to_string(), vec![STATS_PREFIX.to_string()]),
        ]);
        Self {
            inner,
            cache: TtlCache::new(ttl),
            dependents,
        }
    }

    /// Also invalidate `prefixes` whenever `table` is written.
    pub fn with_dependents(mut self, table: &str, prefixes: &[&str]) -> Self {
        self.dependents
            .entry(table.to_string())
            .or_default()
            .extend(prefixes.iter().map(|p| p.to_string()));
        self
    }

    /// The uncached data service.
    pub fn inner(&self) -> &Arc<dyn DataService> {
        &self.inner
    }

    pub fn ttl(&self) -> Duration {
        self.cache.ttl()
    }

    /// Cached value for `key`, or the result of `fetch`, which is cached on success.
    pub async fn get<T, F, Fut>(&self, key: &str, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let value = self
            .cache
            .get(key, || async move {
                let fresh = fetch().await?;
                serde_json::to_value(fresh).context("failed to encode cached value")
            })
            .await?;
        serde_json::from_value(value)
            .with_context(|| format!("failed to decode cached value for {key}"))
    }

    /// Remove entries under `prefix`, or everything when `None`.
    pub async fn invalidate(&self, prefix: Option<&str>) -> usize {
        self.cache.invalidate(prefix).await
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    async fn invalidate_table(&self, table: &str) {
        let mut removed = self.cache.invalidate(Some(&table_prefix(table))).await;
        if let Some(prefixes) = self.dependents.get(table) {
            for prefix in prefixes {
                removed += self.cache.invalidate(Some(prefix)).await;
            }
        }
        tracing::debug!(table, removed, "invalidated after write");
    }
}

#[async_trait]
impl DataService for CachingRepository {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>> {
        let key = format!("{}{}", table_prefix(table), filter.cache_key());
        self.get(&key, || self.inner.select(table, filter)).await
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        let result = self.inner.insert(table, rows).await;
        self.invalidate_table(table).await;
        result
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<Vec<Row>> {
        let result = self.inner.update(table, filter, patch).await;
        self.invalidate_table(table).await;
        result
    }

    async fn update_many(&self, table: &str, updates: Vec<(Filter, Row)>) -> Result<Vec<Row>> {
        let result = self.inner.update_many(table, updates).await;
        self.invalidate_table(table).await;
        result
    }

    async fn soft_delete(&self, table: &str, filter: &Filter) -> Result<u64> {
        let result = self.inner.soft_delete(table, filter).await;
        self.invalidate_table(table).await;
        result
    }

    async fn restore(&self, table: &str, filter: &Filter) -> Result<u64> {
        let result = self.inner.restore(table, filter).await;
        self.invalidate_table(table).await;
        result
    }

    async fn lookup(&self, name: &str, params: Value) -> Result<Value> {
        let key = format!("{RPC_PREFIX}{name}:{params}");
        self.get(&key, || self.inner.lookup(name, params.clone())).await
    }
}
