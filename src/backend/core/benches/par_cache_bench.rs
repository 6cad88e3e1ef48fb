//! Benchmarks for the PAR cache hot path.
use aegis_core::cache::{
    AuthRequest, InMemoryParStore, ParCacheConfig, ParCacheKey, PushedAuthRequestCache,
};
use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn request() -> AuthRequest {
    AuthRequest::new("client-1", "code", "https://app.example.com/callback")
        .with_scopes(["openid", "profile", "email"])
        .with_state("af0ifjsldkj")
        .with_pkce("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM", "S256")
}

fn new_cache(capacity: u16) -> PushedAuthRequestCache {
    PushedAuthRequestCache::new(
        Arc::new(InMemoryParStore::new()),
        ParCacheConfig::default().with_capacity(capacity),
    )
}

fn bench_cache_key(c: &mut Criterion) {
    let key = ParCacheKey::new("instance-123", "urn:ietf:params:oauth:request_uri:abc");
    c.bench_function("par_cache_key_display", |b| b.iter(|| black_box(key.to_string())));
}

fn bench_get(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("par_cache_get");
    for capacity in [0u16, 1_000] {
        let cache = new_cache(capacity);
        rt.block_on(async {
            let expires_at = Utc::now() + Duration::hours(1);
            cache
                .save("instance-1", "urn:par:hot", &request(), expires_at)
                .await
                .unwrap();
        });
        let label = if capacity == 0 { "durable_only" } else { "memory_hit" };
        group.bench_with_input(BenchmarkId::from_parameter(label), &cache, |b, cache| {
            b.to_async(&rt).iter(|| async move {
                black_box(cache.get("instance-1", "urn:par:hot").await.unwrap())
            });
        });
    }
    group.finish();
}

fn bench_save(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("par_cache_save");
    for capacity in [0u16, 100, 1_000] {
        let cache = new_cache(capacity);
        let counter = AtomicU64::new(0);
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &cache, |b, cache| {
            b.to_async(&rt).iter(|| {
                let uri = format!("urn:par:{}", counter.fetch_add(1, Ordering::Relaxed));
                async move {
                    let expires_at = Utc::now() + Duration::hours(1);
                    cache
                        .save("instance-1", &uri, &request(), expires_at)
                        .await
                        .unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_cache_key, bench_get, bench_save);
criterion_main!(benches);
