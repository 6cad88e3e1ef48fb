//! Consumer-facing access to pushed authorization requests.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use super::{AuthRequest, PushedAuthRequestCache};
use crate::error::{AegisError, Result};

/// Creates requests and hands each one out at most once per successful
/// delete.
///
/// `consume` is a read followed by a separate delete. Two concurrent
/// consumers of the same URI can both read the request before either delete
/// lands; callers needing strict single use must serialize per URI.
#[derive(Clone)]
pub struct PushedAuthRequestRepository {
    cache: Arc<PushedAuthRequestCache>,
    lifetime: Duration,
}

impl PushedAuthRequestRepository {
    pub fn new(cache: Arc<PushedAuthRequestCache>, lifetime: Duration) -> Self {
        Self { cache, lifetime }
    }

    /// Default validity of a newly pushed request.
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn cache(&self) -> &PushedAuthRequestCache {
        &self.cache
    }

    /// Absolute expiry for a request created at `now`.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        ChronoDuration::from_std(self.lifetime)
            .ok()
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                AegisError::internal("PAR-l1fe7", format!("invalid lifetime {:?}", self.lifetime))
            })
    }

    /// Store a request that expires after the configured lifetime.
    #[instrument(skip(self, request), fields(instance_id = %instance_id, request_uri = %request_uri))]
    pub async fn create(
        &self,
        instance_id: &str,
        request_uri: &str,
        request: &AuthRequest,
    ) -> Result<DateTime<Utc>> {
        let expires_at = self.expires_at(Utc::now())?;
        self.cache
            .save(instance_id, request_uri, request, expires_at)
            .await?;
        Ok(expires_at)
    }

    /// Return the request and remove it from both tiers.
    #[instrument(skip(self), fields(instance_id = %instance_id, request_uri = %request_uri))]
    pub async fn consume(&self, instance_id: &str, request_uri: &str) -> Result<AuthRequest> {
        let request = self.cache.get(instance_id, request_uri).await?;
        self.cache.delete(instance_id, request_uri).await?;
        Ok(request)
    }

    pub async fn health(&self) -> Result<()> {
        self.cache.health().await
    }
}
