//! Cache-aside helper and its key-value backends.
//!
//! Readers call [`CacheAside::get_or_load`]; writers mutate the authoritative
//! store first and then [`CacheAside::invalidate`] every key the mutation
//! affects. The cache is never the source of truth: any backend failure is
//! logged and treated as a miss.

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-layer errors. Kept apart from `AppError`: they never reach a response.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    BackendConnection(String),
    #[error("cache command error: {0}")]
    BackendCommand(String),
    #[error("cache value error: {0}")]
    InvalidValue(String),
}

/// A string key-value store with per-key TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    // Backend name for logs.
    fn backend_name(&self) -> &'static str;

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    // Overwrites any existing value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    // Returns the number of removed keys.
    async fn delete(&self, key: &str) -> CacheResult<u64>;
}

// --- In-process backend ---

struct Entry {
    value: String,
    stored_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) < self.ttl
    }
}

/// MemoryCache
///
/// Per-instance map. Stale entries are dropped when read, and every write
/// sweeps out whatever else has expired.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    // Simulated outage, for exercising the degraded path.
    unavailable: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> CacheResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::BackendConnection("memory cache marked unavailable".into()));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check_available()?;
        let mut entries = self.lock();
        if let Some(entry) = entries.get(key) {
            if entry.is_fresh(Instant::now()) {
                return Ok(Some(entry.value.clone()));
            }
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, entry| entry.is_fresh(now));
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                stored_at: now,
                ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<u64> {
        self.check_available()?;
        Ok(u64::from(self.lock().remove(key).is_some()))
    }
}

// --- Valkey / Redis backend ---

/// ValkeyCache
///
/// Shared cache for multi-instance deployments (`GET`, `SET .. EX`, `DEL`).
#[derive(Clone)]
pub struct ValkeyCache {
    manager: redis::aio::ConnectionManager,
}

impl ValkeyCache {
    // Connects to a URL like `redis://localhost:6379`.
    pub async fn new(url: &str) -> CacheResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| CacheError::BackendConnection(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::BackendConnection(e.to_string()))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheStore for ValkeyCache {
    fn backend_name(&self) -> &'static str {
        "valkey"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendCommand(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        // EX takes whole seconds; clamp to at least one.
        let ttl_seconds = ttl.as_secs().max(1);
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendCommand(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::BackendCommand(e.to_string()))
    }
}

/// Picks the backend: Valkey when a URL is configured and reachable, otherwise
/// the in-process map.
pub async fn connect(cache_url: Option<&str>) -> Arc<dyn CacheStore> {
    if let Some(url) = cache_url {
        match ValkeyCache::new(url).await {
            Ok(cache) => {
                tracing::info!("using valkey cache backend");
                return Arc::new(cache);
            }
            Err(e) => {
                tracing::warn!(error = %e, "valkey unavailable, falling back to memory cache");
            }
        }
    }
    Arc::new(MemoryCache::new())
}

// --- Cache-aside ---

/// CacheAside
///
/// Typed JSON layer over a [`CacheStore`]. Two concurrent misses on the same
/// key may both load and both write; the values are equivalent and the last
/// write wins.
#[derive(Clone)]
pub struct CacheAside {
    store: Arc<dyn CacheStore>,
}

impl CacheAside {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Cached value, or `None` on a miss, a backend failure or an undecodable
    /// entry.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(backend = self.store.backend_name(), key, error = %e, "cache get failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                let e = CacheError::InvalidValue(e.to_string());
                tracing::warn!(key, error = %e, "dropping undecodable cache entry");
                self.delete(key).await;
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache value not serializable");
                return;
            }
        };
        if let Err(e) = self.store.set(key, &raw, ttl).await {
            tracing::warn!(backend = self.store.backend_name(), key, error = %e, "cache set failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            tracing::warn!(backend = self.store.backend_name(), key, error = %e, "cache delete failed");
        }
    }

    /// Drops every key affected by a completed write.
    pub async fn invalidate(&self, keys: &[&str]) {
        for key in keys {
            self.delete(key).await;
        }
        tracing::debug!(?keys, "cache invalidated");
    }

    /// The read-handler shape: serve from cache, or load from the store and
    /// populate the cache. Load errors propagate and nothing is cached.
    pub async fn get_or_load<T, E, F, Fut>(&self, key: &str, ttl: Duration, load: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            tracing::debug!(key, "cache hit");
            return Ok(hit);
        }
        tracing::debug!(key, "cache miss");
        let value = load().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }
}
