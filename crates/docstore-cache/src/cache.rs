//! Two-tier query cache.
//!
//! Lookups check the in-process tier, then the shared tier; shared hits are
//! copied into the in-process tier. Writes always land in the in-process
//! tier and are forwarded to the shared tier best-effort. Shared-tier
//! failures and timeouts are logged and counted, never returned.
//!
//! Each namespace carries a generation that every invalidation bumps. A
//! value loaded under an older generation is returned to its caller but
//! never cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use docstore_types::CacheSettings;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::key::{pattern_matches, CacheQuery};
use crate::memory::{Lookup, MemoryCache};
use crate::shared::{HttpSharedCache, SharedCache};

/// Cache sizing and lifetimes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub l1_max_entries: usize,
    pub l1_ttl: Duration,
    pub l2_ttl: Duration,
    /// Longest any shared-tier call may take before it is treated as down
    pub l2_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            l1_max_entries: settings.l1_max_entries,
            l1_ttl: Duration::from_secs(settings.l1_ttl_secs),
            l2_ttl: Duration::from_secs(settings.l2_ttl_secs),
            l2_timeout: Duration::from_millis(settings.l2_timeout_ms),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.l1_max_entries == 0 {
            return Err(CacheError::Config("l1_max_entries must be > 0".into()));
        }
        if self.l1_ttl.is_zero() {
            return Err(CacheError::Config("l1_ttl must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CacheMetrics {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l2_errors: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    /// Shared-tier calls that failed or timed out
    pub l2_errors: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub l1_entries: usize,
    pub l2_enabled: bool,
}

impl CacheStats {
    /// Total lookups served
    pub fn lookups(&self) -> u64 {
        self.l1_hits + self.l1_misses
    }

    /// Fraction of lookups answered by either tier
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.lookups();
        if lookups == 0 {
            0.0
        } else {
            (self.l1_hits + self.l2_hits) as f64 / lookups as f64
        }
    }
}

pub struct QueryCache<V> {
    /// Namespace to invalidation count. Locked before `l1` when both are held.
    generations: Mutex<HashMap<String, u64>>,
    l1: Mutex<MemoryCache<V>>,
    l2: Option<Arc<dyn SharedCache>>,
    config: CacheConfig,
    metrics: CacheMetrics,
}

impl<V> QueryCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// In-process tier only
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        Self::build(config, None)
    }

    pub fn with_shared(config: CacheConfig, l2: Arc<dyn SharedCache>) -> Result<Self, CacheError> {
        Self::build(config, Some(l2))
    }

    /// Build from settings, attaching the HTTP shared tier when enabled.
    pub fn from_settings(settings: &CacheSettings) -> Result<Self, CacheError> {
        let config = CacheConfig::from(settings);
        if !settings.l2_enabled {
            return Self::new(config);
        }
        let endpoint = settings
            .l2_endpoint
            .as_deref()
            .ok_or_else(|| CacheError::Config("l2_enabled requires l2_endpoint".into()))?;
        let shared = HttpSharedCache::new(endpoint, config.l2_timeout)?;
        Self::with_shared(config, Arc::new(shared))
    }

    fn build(config: CacheConfig, l2: Option<Arc<dyn SharedCache>>) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self {
            generations: Mutex::new(HashMap::new()),
            l1: Mutex::new(MemoryCache::new(config.l1_max_entries, config.l1_ttl)),
            l2,
            config,
            metrics: CacheMetrics::default(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn has_shared_tier(&self) -> bool {
        self.l2.is_some()
    }

    fn l1_insert(&self, key: String, value: V) {
        let evicted = self
            .l1
            .lock()
            .expect("l1 cache mutex poisoned")
            .insert(key, value);
        if evicted > 0 {
            self.metrics
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    /// Current generation of `namespace`. Capture it before loading a value
    /// and pass it to [`QueryCache::set_if_current`].
    pub fn generation(&self, namespace: &str) -> u64 {
        *self
            .generations
            .lock()
            .expect("cache generation mutex poisoned")
            .entry(namespace.to_string())
            .or_insert(0)
    }

    fn bump_generations(&self, pattern: &str) {
        let mut generations = self.generations.lock().expect("cache generation mutex poisoned");
        for (namespace, generation) in generations.iter_mut() {
            if pattern_matches(pattern, &format!("{}:", namespace)) {
                *generation += 1;
            }
        }
    }

    fn l2_failed(&self, op: &str, key: &str, reason: &str) {
        self.metrics.l2_errors.fetch_add(1, Ordering::Relaxed);
        warn!(op, key, reason, "Shared cache tier unavailable; using in-process tier only");
    }

    /// Cached value for `query`, or `None` on a miss in both tiers.
    pub async fn get(&self, query: &CacheQuery) -> Option<V> {
        let key = query.key();

        let lookup = self.l1.lock().expect("l1 cache mutex poisoned").get(&key);
        match lookup {
            Lookup::Hit(value) => {
                self.metrics.l1_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "L1 hit");
                return Some(value);
            }
            Lookup::Expired => {
                self.metrics.expirations.fetch_add(1, Ordering::Relaxed);
                self.metrics.l1_misses.fetch_add(1, Ordering::Relaxed);
            }
            Lookup::Miss => {
                self.metrics.l1_misses.fetch_add(1, Ordering::Relaxed);
            }
        }

        let l2 = self.l2.as_ref()?;
        match timeout(self.config.l2_timeout, l2.get(&key)).await {
            Ok(Ok(Some(bytes))) => match serde_json::from_slice::<V>(&bytes) {
                Ok(value) => {
                    self.metrics.l2_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "L2 hit");
                    self.l1_insert(key, value.clone());
                    Some(value)
                }
                Err(e) => {
                    self.l2_failed("get", &key, &format!("undecodable payload: {}", e));
                    None
                }
            },
            Ok(Ok(None)) => {
                self.metrics.l2_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Ok(Err(e)) => {
                self.l2_failed("get", &key, &e.to_string());
                None
            }
            Err(_) => {
                self.l2_failed("get", &key, "timed out");
                None
            }
        }
    }

    /// Store `value` for `query` in every available tier.
    pub async fn set(&self, query: &CacheQuery, value: V) {
        let key = query.key();
        let payload = self.l2.as_ref().map(|_| serde_json::to_vec(&value));
        self.l1_insert(key.clone(), value);
        self.l2_set(query, &key, payload, None).await;
    }

    /// Store `value` only if `query`'s namespace has not been invalidated
    /// since `generation` was read. Returns whether it was stored.
    pub async fn set_if_current(&self, query: &CacheQuery, value: V, generation: u64) -> bool {
        let key = query.key();
        let payload = self.l2.as_ref().map(|_| serde_json::to_vec(&value));
        {
            let generations = self.generations.lock().expect("cache generation mutex poisoned");
            if generations.get(query.namespace()).copied().unwrap_or(0) != generation {
                debug!(key = %key, "Namespace invalidated during load; not caching");
                return false;
            }
            let evicted = self
                .l1
                .lock()
                .expect("l1 cache mutex poisoned")
                .insert(key.clone(), value);
            if evicted > 0 {
                self.metrics
                    .evictions
                    .fetch_add(evicted as u64, Ordering::Relaxed);
            }
        }
        self.l2_set(query, &key, payload, Some(generation)).await;
        true
    }

    /// Forward a write to the shared tier. With a `generation`, the write is
    /// withdrawn again if an invalidation overtook it.
    async fn l2_set(
        &self,
        query: &CacheQuery,
        key: &str,
        payload: Option<serde_json::Result<Vec<u8>>>,
        generation: Option<u64>,
    ) {
        let (Some(l2), Some(payload)) = (self.l2.as_ref(), payload) else {
            return;
        };
        let payload = match payload {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Value not serializable for shared tier");
                return;
            }
        };
        match timeout(self.config.l2_timeout, l2.set(key, payload, self.config.l2_ttl)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return self.l2_failed("set", key, &e.to_string()),
            Err(_) => return self.l2_failed("set", key, "timed out"),
        }

        let Some(generation) = generation else {
            return;
        };
        if self.generation(query.namespace()) != generation {
            match timeout(self.config.l2_timeout, l2.delete(key)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.l2_failed("delete", key, &e.to_string()),
                Err(_) => self.l2_failed("delete", key, "timed out"),
            }
        }
    }

    /// Look up `query`; on a miss run `loader` and cache its value.
    /// Loader errors are returned and nothing is cached, as is a value whose
    /// namespace was invalidated while it loaded.
    pub async fn get_or_load<F, Fut, E>(&self, query: &CacheQuery, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let generation = self.generation(query.namespace());
        if let Some(value) = self.get(query).await {
            return Ok(value);
        }
        let value = loader().await?;
        self.set_if_current(query, value.clone(), generation).await;
        Ok(value)
    }

    /// Remove one query from both tiers.
    pub async fn invalidate(&self, query: &CacheQuery) {
        let key = query.key();
        {
            let mut generations = self.generations.lock().expect("cache generation mutex poisoned");
            if let Some(generation) = generations.get_mut(query.namespace()) {
                *generation += 1;
            }
            self.l1.lock().expect("l1 cache mutex poisoned").remove(&key);
        }

        if let Some(l2) = self.l2.as_ref() {
            match timeout(self.config.l2_timeout, l2.delete(&key)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.l2_failed("delete", &key, &e.to_string()),
                Err(_) => self.l2_failed("delete", &key, "timed out"),
            }
        }
    }

    /// Clear the whole in-process tier and matching shared keys. Returns
    /// how many in-process entries were dropped.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        self.bump_generations(pattern);
        let cleared = self.l1.lock().expect("l1 cache mutex poisoned").clear();
        debug!(pattern, cleared, "Cleared in-process cache");

        if let Some(l2) = self.l2.as_ref() {
            match timeout(self.config.l2_timeout, l2.delete_pattern(pattern)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => self.l2_failed("delete_pattern", pattern, &e.to_string()),
                Err(_) => self.l2_failed("delete_pattern", pattern, "timed out"),
            }
        }
        cleared
    }

    pub fn stats(&self) -> CacheStats {
        let l1_entries = self.l1.lock().expect("l1 cache mutex poisoned").len();
        CacheStats {
            l1_hits: self.metrics.l1_hits.load(Ordering::Relaxed),
            l1_misses: self.metrics.l1_misses.load(Ordering::Relaxed),
            l2_hits: self.metrics.l2_hits.load(Ordering::Relaxed),
            l2_misses: self.metrics.l2_misses.load(Ordering::Relaxed),
            l2_errors: self.metrics.l2_errors.load(Ordering::Relaxed),
            evictions: self.metrics.evictions.load(Ordering::Relaxed),
            expirations: self.metrics.expirations.load(Ordering::Relaxed),
            l1_entries,
            l2_enabled: self.l2.is_some(),
        }
    }

    /// Zero the counters; cached entries are untouched.
    pub fn reset_stats(&self) {
        for counter in [
            &self.metrics.l1_hits,
            &self.metrics.l1_misses,
            &self.metrics.l2_hits,
            &self.metrics.l2_misses,
            &self.metrics.l2_errors,
            &self.metrics.evictions,
            &self.metrics.expirations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Drop in-process entries and close the shared tier.
    pub async fn close(&self) {
        self.l1.lock().expect("l1 cache mutex poisoned").clear();
        if let Some(l2) = self.l2.as_ref() {
            if let Err(e) = l2.close().await {
                warn!(error = %e, "Failed to close shared cache tier");
            }
        }
    }
}
