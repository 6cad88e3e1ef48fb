//! Durable tier of the PAR cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::instrument;

use super::key::ParCacheKey;
use crate::error::{AegisError, Result};

/// One persisted pushed authorization request.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ParRow {
    pub instance_id: String,
    pub request_uri: String,
    /// JSON-serialized [`AuthRequest`](super::AuthRequest)
    pub request: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

impl ParRow {
    pub fn key(&self) -> ParCacheKey {
        ParCacheKey::new(&self.instance_id, &self.request_uri)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Relational persistence keyed by (tenant, request URI).
#[async_trait]
pub trait ParStore: Send + Sync {
    /// Insert a new row; an existing (tenant, uri) pair is an error.
    async fn insert(&self, row: ParRow) -> Result<()>;

    /// The row for (tenant, uri), expired or not.
    async fn select(&self, instance_id: &str, request_uri: &str) -> Result<Option<ParRow>>;

    /// Delete the row; returns whether one existed.
    async fn delete(&self, instance_id: &str, request_uri: &str) -> Result<bool>;

    /// Liveness probe.
    async fn ping(&self) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Process-local [`ParStore`] used by tests and single-node setups.
#[derive(Debug, Default)]
pub struct InMemoryParStore {
    rows: DashMap<ParCacheKey, ParRow>,
    unavailable: AtomicBool,
    selects: AtomicU64,
}

impl InMemoryParStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `select` calls served.
    pub fn select_count(&self) -> u64 {
        self.selects.load(Ordering::Relaxed)
    }

    pub fn contains(&self, instance_id: &str, request_uri: &str) -> bool {
        self.rows
            .contains_key(&ParCacheKey::new(instance_id, request_uri))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AegisError::internal("STORE-d0wN1", "par store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ParStore for InMemoryParStore {
    async fn insert(&self, row: ParRow) -> Result<()> {
        self.check_available()?;
        match self.rows.entry(row.key()) {
            Entry::Occupied(_) => Err(AegisError::internal(
                "STORE-dUp11",
                format!("request uri {} already stored", row.request_uri),
            )),
            Entry::Vacant(slot) => {
                slot.insert(row);
                Ok(())
            }
        }
    }

    async fn select(&self, instance_id: &str, request_uri: &str) -> Result<Option<ParRow>> {
        self.check_available()?;
        self.selects.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .rows
            .get(&ParCacheKey::new(instance_id, request_uri))
            .map(|row| row.clone()))
    }

    async fn delete(&self, instance_id: &str, request_uri: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self
            .rows
            .remove(&ParCacheKey::new(instance_id, request_uri))
            .is_some())
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Postgres Store
// ═══════════════════════════════════════════════════════════════════════════════

/// [`ParStore`] over an externally provisioned table:
///
/// ```sql
/// CREATE TABLE auth.pushed_auth_requests (
///     instance_id TEXT        NOT NULL,
///     request_uri TEXT        NOT NULL,
///     request     BYTEA       NOT NULL,
///     expires_at  TIMESTAMPTZ NOT NULL,
///     PRIMARY KEY (instance_id, request_uri)
/// );
/// ```
#[derive(Debug, Clone)]
pub struct PgParStore {
    pool: PgPool,
}

impl PgParStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParStore for PgParStore {
    #[instrument(skip(self, row), fields(instance_id = %row.instance_id))]
    async fn insert(&self, row: ParRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO auth.pushed_auth_requests (request_uri, request, instance_id, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&row.request_uri)
        .bind(&row.request)
        .bind(&row.instance_id)
        .bind(row.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn select(&self, instance_id: &str, request_uri: &str) -> Result<Option<ParRow>> {
        let row = sqlx::query_as::<_, ParRow>(
            r#"
            SELECT instance_id, request_uri, request, expires_at
            FROM auth.pushed_auth_requests
            WHERE instance_id = $1 AND request_uri = $2
            "#,
        )
        .bind(instance_id)
        .bind(request_uri)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    #[instrument(skip(self))]
    async fn delete(&self, instance_id: &str, request_uri: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM auth.pushed_auth_requests
            WHERE instance_id = $1 AND request_uri = $2
            "#,
        )
        .bind(instance_id)
        .bind(request_uri)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(instance_id: &str, uri: &str) -> ParRow {
        ParRow {
            instance_id: instance_id.to_string(),
            request_uri: uri.to_string(),
            request: b"{}".to_vec(),
            expires_at: Utc::now() + Duration::minutes(1),
        }
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let store = InMemoryParStore::new();
        store.insert(row("inst", "uri")).await.unwrap();
        assert!(store.insert(row("inst", "uri")).await.is_err());
        assert!(store.insert(row("other", "uri")).await.is_ok());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let store = InMemoryParStore::new();
        store.insert(row("inst", "uri")).await.unwrap();
        assert!(store.delete("inst", "uri").await.unwrap());
        assert!(!store.delete("inst", "uri").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_ping() {
        let store = InMemoryParStore::new();
        assert!(store.ping().await.is_ok());
        store.set_unavailable(true);
        assert!(store.ping().await.is_err());
    }
}
