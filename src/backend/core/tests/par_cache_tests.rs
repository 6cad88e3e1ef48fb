//! Integration tests for the pushed authorization request cache.

use aegis_core::cache::{
    AuthRequest, InMemoryParStore, ParCacheConfig, ParRow, ParStore, PushedAuthRequestCache,
    PushedAuthRequestRepository,
};
use aegis_core::error::ErrorKind;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_test::assert_ok;

// ============================================================================
// Test Utilities
// ============================================================================

fn request(client_id: &str) -> AuthRequest {
    AuthRequest::new(client_id, "code", "https://app.example.com/callback")
        .with_scopes(["openid", "profile"])
        .with_state("xyz")
        .with_pkce("challenge", "S256")
}

fn cache_with(capacity: u16) -> (Arc<InMemoryParStore>, PushedAuthRequestCache) {
    let store = Arc::new(InMemoryParStore::new());
    let cache = PushedAuthRequestCache::new(
        store.clone(),
        ParCacheConfig::default().with_capacity(capacity),
    );
    (store, cache)
}

fn in_a_minute() -> chrono::DateTime<Utc> {
    Utc::now() + ChronoDuration::seconds(60)
}

// ============================================================================
// Save / Get / Delete
// ============================================================================

#[tokio::test]
async fn test_save_then_get_within_tenant() {
    let (_, cache) = cache_with(10);
    let req = request("client-a");

    assert_ok!(cache.save("tenant-a", "urn:par:1", &req, in_a_minute()).await);

    assert_eq!(cache.get("tenant-a", "urn:par:1").await.unwrap(), req);

    let err = cache.get("tenant-b", "urn:par:1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_same_uri_in_two_tenants_does_not_collide() {
    let (_, cache) = cache_with(10);

    assert_ok!(cache.save("tenant-a", "urn:par:1", &request("a"), in_a_minute()).await);
    assert_ok!(cache.save("tenant-b", "urn:par:1", &request("b"), in_a_minute()).await);

    assert_eq!(cache.get("tenant-a", "urn:par:1").await.unwrap().client_id, "a");
    assert_eq!(cache.get("tenant-b", "urn:par:1").await.unwrap().client_id, "b");
}

#[tokio::test]
async fn test_expired_request_is_not_found_in_both_tiers() {
    let (store, cache) = cache_with(10);
    let past = Utc::now() - ChronoDuration::seconds(1);

    assert_ok!(cache.save("tenant-a", "urn:par:old", &request("a"), past).await);
    assert!(store.contains("tenant-a", "urn:par:old"));

    let err = cache.get("tenant-a", "urn:par:old").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.code(), "CACHE-cA1OPE");
    assert!(!cache.is_memory_cached("tenant-a", "urn:par:old"));
}

#[tokio::test]
async fn test_expired_request_with_memory_disabled() {
    let (_, cache) = cache_with(0);
    let past = Utc::now() - ChronoDuration::seconds(1);

    assert_ok!(cache.save("tenant-a", "urn:par:old", &request("a"), past).await);

    let err = cache.get("tenant-a", "urn:par:old").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_delete_removes_from_both_tiers() {
    let (store, cache) = cache_with(10);

    assert_ok!(cache.save("tenant-a", "urn:par:1", &request("a"), in_a_minute()).await);
    assert!(cache.is_memory_cached("tenant-a", "urn:par:1"));

    assert_ok!(cache.delete("tenant-a", "urn:par:1").await);

    assert!(!cache.is_memory_cached("tenant-a", "urn:par:1"));
    assert!(!store.contains("tenant-a", "urn:par:1"));
    let err = cache.get("tenant-a", "urn:par:1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_delete_of_unknown_request_succeeds() {
    let (_, cache) = cache_with(10);
    assert_ok!(cache.delete("tenant-a", "urn:par:none").await);
}

#[tokio::test]
async fn test_duplicate_uri_is_internal_error() {
    let (_, cache) = cache_with(10);

    assert_ok!(cache.save("tenant-a", "urn:par:1", &request("a"), in_a_minute()).await);
    let err = cache
        .save("tenant-a", "urn:par:1", &request("b"), in_a_minute())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(cache.get("tenant-a", "urn:par:1").await.unwrap().client_id, "a");
}

// ============================================================================
// Memory Tier
// ============================================================================

#[tokio::test]
async fn test_eviction_falls_back_to_durable_tier() {
    let (store, cache) = cache_with(3);

    for i in 0..4 {
        let uri = format!("urn:par:{}", i);
        assert_ok!(cache.save("tenant-a", &uri, &request("a"), in_a_minute()).await);
    }

    let cached: Vec<bool> = (0..4)
        .map(|i| cache.is_memory_cached("tenant-a", &format!("urn:par:{}", i)))
        .collect();
    assert_eq!(cached, vec![false, true, true, true]);
    assert_eq!(cache.stats().evictions, 1);
    assert_eq!(store.len(), 4);

    let selects = store.select_count();
    assert_ok!(cache.get("tenant-a", "urn:par:0").await);
    assert_eq!(store.select_count(), selects + 1);
    assert!(cache.is_memory_cached("tenant-a", "urn:par:0"));

    // Backfilled, so the second read stays in memory
    assert_ok!(cache.get("tenant-a", "urn:par:0").await);
    assert_eq!(store.select_count(), selects + 1);

    let stats = cache.stats();
    assert_eq!(stats.backfills, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_memory_hit_skips_durable_store() {
    let (store, cache) = cache_with(10);

    assert_ok!(cache.save("tenant-a", "urn:par:1", &request("a"), in_a_minute()).await);
    assert_ok!(cache.get("tenant-a", "urn:par:1").await);

    assert_eq!(store.select_count(), 0);
}

#[tokio::test]
async fn test_disabled_memory_tier_reads_durable_store() {
    let (store, cache) = cache_with(0);
    assert!(!cache.memory_tier_enabled());

    assert_ok!(cache.save("tenant-a", "urn:par:1", &request("a"), in_a_minute()).await);
    assert!(!cache.is_memory_cached("tenant-a", "urn:par:1"));

    assert_ok!(cache.get("tenant-a", "urn:par:1").await);
    assert_ok!(cache.get("tenant-a", "urn:par:1").await);

    assert_eq!(store.select_count(), 2);
    assert_eq!(cache.stats().backfills, 0);
}

/// Store that parks the first `select` after it has read the row, until released.
struct GatedStore {
    inner: Arc<InMemoryParStore>,
    armed: AtomicBool,
    selected: Notify,
    release: Notify,
}

impl GatedStore {
    fn new(inner: Arc<InMemoryParStore>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(true),
            selected: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait::async_trait]
impl ParStore for GatedStore {
    async fn insert(&self, row: ParRow) -> aegis_core::Result<()> {
        self.inner.insert(row).await
    }

    async fn select(
        &self,
        instance_id: &str,
        request_uri: &str,
    ) -> aegis_core::Result<Option<ParRow>> {
        let row = self.inner.select(instance_id, request_uri).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.selected.notify_one();
            self.release.notified().await;
        }
        Ok(row)
    }

    async fn delete(&self, instance_id: &str, request_uri: &str) -> aegis_core::Result<bool> {
        self.inner.delete(instance_id, request_uri).await
    }

    async fn ping(&self) -> aegis_core::Result<()> {
        self.inner.ping().await
    }
}

#[tokio::test]
async fn test_delete_during_durable_read_is_not_backfilled() {
    let inner = Arc::new(InMemoryParStore::new());
    let writer = PushedAuthRequestCache::new(
        inner.clone(),
        ParCacheConfig::default().with_capacity(0),
    );
    assert_ok!(writer.save("tenant-a", "urn:par:1", &request("a"), in_a_minute()).await);

    let gated = Arc::new(GatedStore::new(inner.clone()));
    let cache = Arc::new(PushedAuthRequestCache::new(
        gated.clone(),
        ParCacheConfig::default().with_capacity(10),
    ));

    let reader = tokio::spawn({
        let cache = cache.clone();
        async move { cache.get("tenant-a", "urn:par:1").await }
    });

    // The reader holds the row; the delete lands before it can backfill.
    gated.selected.notified().await;
    assert_ok!(cache.delete("tenant-a", "urn:par:1").await);
    gated.release.notify_one();

    assert_ok!(reader.await.unwrap());
    assert!(!cache.is_memory_cached("tenant-a", "urn:par:1"));
    assert_eq!(cache.stats().backfills, 0);

    let err = cache.get("tenant-a", "urn:par:1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failed_save_leaves_memory_empty() {
    let (store, cache) = cache_with(10);
    store.set_unavailable(true);

    let err = cache
        .save("tenant-a", "urn:par:1", &request("a"), in_a_minute())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.code(), "CACHE-B4ZGaB");
    assert!(!cache.is_memory_cached("tenant-a", "urn:par:1"));
}

#[tokio::test]
async fn test_failed_delete_keeps_memory_entry() {
    let (store, cache) = cache_with(10);
    assert_ok!(cache.save("tenant-a", "urn:par:1", &request("a"), in_a_minute()).await);

    store.set_unavailable(true);
    let err = cache.delete("tenant-a", "urn:par:1").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(cache.is_memory_cached("tenant-a", "urn:par:1"));
}

#[tokio::test]
async fn test_failed_select_is_internal_not_not_found() {
    let (store, cache) = cache_with(0);
    store.set_unavailable(true);

    let err = cache.get("tenant-a", "urn:par:1").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.code(), "CACHE-V8TPX2");
}

/// Store whose calls never complete within the test timeout.
struct SlowStore;

#[async_trait::async_trait]
impl ParStore for SlowStore {
    async fn insert(&self, _row: aegis_core::cache::ParRow) -> aegis_core::Result<()> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }

    async fn select(
        &self,
        _instance_id: &str,
        _request_uri: &str,
    ) -> aegis_core::Result<Option<aegis_core::cache::ParRow>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(None)
    }

    async fn delete(&self, _instance_id: &str, _request_uri: &str) -> aegis_core::Result<bool> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(false)
    }

    async fn ping(&self) -> aegis_core::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let cache = PushedAuthRequestCache::new(
        Arc::new(SlowStore),
        ParCacheConfig::default().with_store_timeout(Duration::from_millis(50)),
    );

    let err = cache
        .save("tenant-a", "urn:par:1", &request("a"), in_a_minute())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.code(), "CACHE-t1mE0");
    assert!(!cache.is_memory_cached("tenant-a", "urn:par:1"));
}

// ============================================================================
// Repository
// ============================================================================

#[tokio::test]
async fn test_consume_returns_request_once() {
    let (store, cache) = cache_with(10);
    let repo = PushedAuthRequestRepository::new(Arc::new(cache), Duration::from_secs(60));
    let req = request("a");

    let expires_at = repo.create("tenant-a", "urn:par:1", &req).await.unwrap();
    assert!(expires_at > Utc::now());

    assert_eq!(repo.consume("tenant-a", "urn:par:1").await.unwrap(), req);
    assert!(store.is_empty());

    let err = repo.consume("tenant-a", "urn:par:1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_repository_health_follows_store() {
    let (store, cache) = cache_with(10);
    let repo = PushedAuthRequestRepository::new(Arc::new(cache), Duration::from_secs(60));

    assert_ok!(repo.health().await);

    store.set_unavailable(true);
    assert!(repo.health().await.is_err());
}
