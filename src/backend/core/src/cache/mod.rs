//! Tiered cache for pushed authorization requests (PAR).
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  PushedAuthRequestCache                       │
//! │                                                              │
//! │   save ──► durable store ──ok──► memory tier                 │
//! │   get  ──► memory tier ──miss──► durable store ──► backfill  │
//! │   delete ► durable store ──────► memory tier (evict)         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - The durable store is authoritative. Memory is only written after the
//!   durable write succeeded, so memory never holds an uncommitted request.
//! - A request past its `expires_at` is never returned, whichever tier holds it.
//! - Keys embed the tenant; identical request URIs of two instances never collide.
//! - Memory eviction degrades to a cache miss, never to data loss.

pub mod key;
pub mod memory;
pub mod repository;
pub mod request;
pub mod store;

pub use key::ParCacheKey;
pub use memory::{Backfill, Lookup, MemoryEntry, MemoryTier};
pub use repository::PushedAuthRequestRepository;
pub use request::AuthRequest;
pub use store::{InMemoryParStore, ParRow, ParStore, PgParStore};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::error::{AegisError, ErrorContext, Result};
use crate::telemetry::redact_json;

const NOT_FOUND_KEY: &str = "Errors.AuthRequest.NotFound";

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for the PAR cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParCacheConfig {
    /// Memory tier capacity; 0 disables the tier
    pub capacity: u16,

    /// Upper bound for every durable store call
    #[serde(with = "humantime_serde")]
    pub store_timeout: Duration,
}

impl Default for ParCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            store_timeout: Duration::from_secs(5),
        }
    }
}

impl ParCacheConfig {
    pub fn with_capacity(mut self, capacity: u16) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }
}

/// Counters since construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub backfills: u64,
    pub evictions: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache
// ═══════════════════════════════════════════════════════════════════════════════

/// Two-tier store for short-lived, tenant-scoped authorization requests.
pub struct PushedAuthRequestCache {
    store: Arc<dyn ParStore>,
    memory: MemoryTier,
    config: ParCacheConfig,

    hits: AtomicU64,
    misses: AtomicU64,
    backfills: AtomicU64,
    evictions: AtomicU64,
}

impl PushedAuthRequestCache {
    pub fn new(store: Arc<dyn ParStore>, config: ParCacheConfig) -> Self {
        let memory = MemoryTier::new(config.capacity);
        if memory.is_enabled() {
            info!(capacity = config.capacity, "PAR memory cache enabled");
        } else {
            info!("PAR memory cache disabled, all lookups use the durable store");
        }

        Self {
            store,
            memory,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            backfills: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn memory_tier_enabled(&self) -> bool {
        self.memory.is_enabled()
    }

    /// Whether the memory tier currently holds the request.
    pub fn is_memory_cached(&self, instance_id: &str, request_uri: &str) -> bool {
        self.memory.contains(&ParCacheKey::new(instance_id, request_uri))
    }

    pub fn config(&self) -> &ParCacheConfig {
        &self.config
    }

    pub fn stats(&self) -> ParCacheStats {
        ParCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            backfills: self.backfills.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Persist the request, then make it visible in memory.
    #[instrument(skip(self, request), fields(instance_id = %instance_id, request_uri = %request_uri))]
    pub async fn save(
        &self,
        instance_id: &str,
        request_uri: &str,
        request: &AuthRequest,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(request).internal_err("CACHE-TfX8Eq")?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            if let Ok(value) = serde_json::to_value(request) {
                debug!(request = %redact_json(&value), "Saving pushed authorization request");
            }
        }

        let row = ParRow {
            instance_id: instance_id.to_string(),
            request_uri: request_uri.to_string(),
            request: bytes,
            expires_at,
        };
        self.bounded(self.store.insert(row))
            .await
            .map_err(|e| wrap("CACHE-B4ZGaB", e))?;

        self.remember(
            ParCacheKey::new(instance_id, request_uri),
            MemoryEntry {
                request: request.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    /// Fetch an unexpired request, preferring memory.
    #[instrument(skip(self), fields(instance_id = %instance_id, request_uri = %request_uri))]
    pub async fn get(&self, instance_id: &str, request_uri: &str) -> Result<AuthRequest> {
        let key = ParCacheKey::new(instance_id, request_uri);
        let now = Utc::now();

        match self.memory.get(&key, now) {
            Lookup::Hit(request) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("par_cache_hits_total").increment(1);
                return Ok(request);
            }
            Lookup::Expired => self.record_miss("expired"),
            Lookup::Miss => self.record_miss("not_found"),
        }

        let epoch = self.memory.delete_epoch();
        let row = self
            .bounded(self.store.select(instance_id, request_uri))
            .await
            .map_err(|e| wrap("CACHE-V8TPX2", e))?
            .ok_or_else(|| AegisError::not_found("CACHE-aMz1qe", NOT_FOUND_KEY))?;

        if row.is_expired(now) {
            return Err(AegisError::not_found("CACHE-cA1OPE", NOT_FOUND_KEY)
                .with_context("expires_at", row.expires_at));
        }

        let request: AuthRequest =
            serde_json::from_slice(&row.request).internal_err("CACHE-mvAP3X")?;

        let entry = MemoryEntry {
            request: request.clone(),
            expires_at: row.expires_at,
        };
        match self.memory.backfill(key, entry, epoch) {
            Backfill::Stored { evicted } => {
                self.backfills.fetch_add(1, Ordering::Relaxed);
                counter!("par_cache_backfills_total").increment(1);
                self.record_eviction(evicted);
            }
            // A concurrent delete won; the row read above must not resurrect it.
            Backfill::Stale if self.memory.is_enabled() => {
                debug!("Skipped backfill after concurrent delete");
            }
            Backfill::Stale => {}
        }

        Ok(request)
    }

    /// Remove the request from the durable store, then from memory.
    ///
    /// The memory removal advances the tier's delete epoch, so a `get` that
    /// read the row before this delete does not backfill it afterwards.
    #[instrument(skip(self), fields(instance_id = %instance_id, request_uri = %request_uri))]
    pub async fn delete(&self, instance_id: &str, request_uri: &str) -> Result<()> {
        self.bounded(self.store.delete(instance_id, request_uri))
            .await
            .map_err(|e| wrap("CACHE-J2mAJj", e))?;

        self.memory.remove(&ParCacheKey::new(instance_id, request_uri));
        Ok(())
    }

    /// Health of the durable store.
    pub async fn health(&self) -> Result<()> {
        self.bounded(self.store.ping()).await
    }

    fn remember(&self, key: ParCacheKey, entry: MemoryEntry) {
        let evicted = self.memory.insert(key, entry);
        self.record_eviction(evicted);
    }

    fn record_eviction(&self, evicted: Option<ParCacheKey>) {
        if let Some(evicted) = evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            counter!("par_cache_evictions_total").increment(1);
            debug!(evicted = %evicted, "Evicted least recently used request from memory");
        }
    }

    fn record_miss(&self, reason: &'static str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!("par_cache_misses_total", "reason" => reason).increment(1);
    }

    /// Run a durable call under the configured timeout.
    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.store_timeout, call)
            .await
            .map_err(|elapsed| {
                AegisError::internal("CACHE-t1mE0", "durable store call timed out")
                    .with_source(elapsed)
            })?
    }
}

/// Re-code a durable store failure, keeping timeouts distinguishable.
fn wrap(code: &'static str, error: AegisError) -> AegisError {
    let error = if error.code() == "CACHE-t1mE0" {
        error
    } else {
        AegisError::wrapping(code, error)
    };
    error.log();
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::Duration as ChronoDuration;

    fn request() -> AuthRequest {
        AuthRequest::new("client", "code", "https://app.example/cb").with_scopes(["openid"])
    }

    fn cache(capacity: u16) -> (Arc<InMemoryParStore>, PushedAuthRequestCache) {
        let store = Arc::new(InMemoryParStore::new());
        let cache = PushedAuthRequestCache::new(
            store.clone(),
            ParCacheConfig::default().with_capacity(capacity),
        );
        (store, cache)
    }

    #[tokio::test]
    async fn test_memory_hit_skips_durable_read() {
        let (store, cache) = cache(8);
        cache
            .save("inst", "uri", &request(), Utc::now() + ChronoDuration::minutes(1))
            .await
            .unwrap();

        assert_eq!(cache.get("inst", "uri").await.unwrap(), request());
        assert_eq!(store.select_count(), 0);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_memory_empty() {
        let (store, cache) = cache(8);
        store.set_unavailable(true);

        let err = cache
            .save("inst", "uri", &request(), Utc::now() + ChronoDuration::minutes(1))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.code(), "CACHE-B4ZGaB");
        assert!(!cache.is_memory_cached("inst", "uri"));
    }

    #[tokio::test]
    async fn test_missing_request_is_not_found() {
        let (_, cache) = cache(8);
        let err = cache.get("inst", "nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.code(), "CACHE-aMz1qe");
        assert_eq!(err.message_key(), NOT_FOUND_KEY);
    }

    #[tokio::test]
    async fn test_corrupt_durable_row_is_internal() {
        let (store, cache) = cache(8);
        store
            .insert(ParRow {
                instance_id: "inst".to_string(),
                request_uri: "uri".to_string(),
                request: b"not json".to_vec(),
                expires_at: Utc::now() + ChronoDuration::minutes(1),
            })
            .await
            .unwrap();

        let err = cache.get("inst", "uri").await.unwrap_err();
        assert_eq!(err.code(), "CACHE-mvAP3X");
    }

    #[tokio::test]
    async fn test_health_follows_store() {
        let (store, cache) = cache(8);
        assert!(cache.health().await.is_ok());
        store.set_unavailable(true);
        assert!(cache.health().await.is_err());
    }
}
