//! Postgres-backed event log.
//!
//! Expects an externally provisioned table:
//!
//! ```sql
//! CREATE TABLE eventstore.events (
//!     position        BIGSERIAL PRIMARY KEY,
//!     event_id        UUID        NOT NULL,
//!     instance_id     TEXT        NOT NULL,
//!     aggregate_type  TEXT        NOT NULL,
//!     aggregate_id    TEXT        NOT NULL,
//!     resource_owner  TEXT        NOT NULL,
//!     sequence        BIGINT      NOT NULL,
//!     event_type      TEXT        NOT NULL,
//!     payload         JSONB       NOT NULL,
//!     creator         TEXT        NOT NULL,
//!     created_at      TIMESTAMPTZ NOT NULL,
//!     UNIQUE (instance_id, aggregate_type, aggregate_id, sequence)
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::event::{AggregateRef, EventId, EventMetadata, StoredEvent};
use super::log::{conflict, EventFilter, EventLog, PushBatch};
use crate::error::{AegisError, Result};

/// [`EventLog`] over Postgres.
///
/// Each push first takes transaction-scoped advisory locks on every stream it
/// guards or appends to, in key order. Guard checks and next-sequence reads
/// then see every batch committed before the lock was granted, so under READ
/// COMMITTED a stale writer fails its guard instead of appending after a
/// concurrent commit. The unique constraint stays as the last line for
/// writers that bypass this type.
#[derive(Debug, Clone)]
pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    #[instrument(skip(self, batch), fields(events = batch.len(), guards = batch.guards.len()))]
    async fn push(&self, batch: PushBatch) -> Result<Vec<StoredEvent>> {
        let mut tx = self.pool.begin().await?;

        for lock in advisory_locks(&batch) {
            let sql = if lock.exclusive {
                "SELECT pg_advisory_xact_lock(hashtext($1))"
            } else {
                "SELECT pg_advisory_xact_lock_shared(hashtext($1))"
            };
            sqlx::query(sql).bind(&lock.key).execute(&mut *tx).await?;
        }

        for guard in &batch.guards {
            let mut query = QueryBuilder::<Postgres>::new(
                "SELECT COALESCE(MAX(sequence), 0) FROM eventstore.events WHERE ",
            );
            push_filter(&mut query, &guard.filter);
            let latest: i64 = query.build_query_scalar().fetch_one(&mut *tx).await?;

            if latest as u64 > guard.last_sequence {
                return Err(conflict(format!(
                    "sequence {} is newer than expected {}",
                    latest, guard.last_sequence
                )));
            }
        }

        let now = Utc::now();
        let mut next: HashMap<AggregateRef, u64> = HashMap::new();
        let mut appended = Vec::with_capacity(batch.events.len());

        for pending in batch.events {
            let sequence = match next.get(&pending.aggregate) {
                Some(sequence) => sequence + 1,
                None => {
                    let latest: i64 = sqlx::query_scalar(
                        r#"
                        SELECT COALESCE(MAX(sequence), 0) FROM eventstore.events
                        WHERE instance_id = $1 AND aggregate_type = $2 AND aggregate_id = $3
                        "#,
                    )
                    .bind(&pending.aggregate.instance_id)
                    .bind(pending.aggregate.aggregate_type.as_str())
                    .bind(&pending.aggregate.id)
                    .fetch_one(&mut *tx)
                    .await?;
                    latest as u64 + 1
                }
            };
            next.insert(pending.aggregate.clone(), sequence);

            let stored = pending.into_stored(sequence, now);
            let metadata = &stored.metadata;
            sqlx::query(
                r#"
                INSERT INTO eventstore.events
                    (event_id, instance_id, aggregate_type, aggregate_id, resource_owner,
                     sequence, event_type, payload, creator, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(metadata.event_id.0)
            .bind(&metadata.aggregate.instance_id)
            .bind(metadata.aggregate.aggregate_type.as_str())
            .bind(&metadata.aggregate.id)
            .bind(&metadata.aggregate.resource_owner)
            .bind(metadata.sequence as i64)
            .bind(&metadata.event_type)
            .bind(&stored.payload)
            .bind(&metadata.creator)
            .bind(metadata.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_insert_error)?;

            appended.push(stored);
        }

        tx.commit().await.map_err(map_insert_error)?;
        debug!(appended = appended.len(), "Events appended");

        Ok(appended)
    }

    #[instrument(skip(self, filter), fields(instance_id = %filter.instance_id))]
    async fn query(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>> {
        let mut query = QueryBuilder::<Postgres>::new(
            r#"
            SELECT event_id, instance_id, aggregate_type, aggregate_id, resource_owner,
                   sequence, event_type, payload, creator, created_at
            FROM eventstore.events
            WHERE "#,
        );
        push_filter(&mut query, filter);
        query.push(" ORDER BY position ASC");

        let rows: Vec<EventRow> = query.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(EventRow::into_stored).collect()
    }
}

// =============================================================================
// Internal helpers
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    event_id: Uuid,
    instance_id: String,
    aggregate_type: String,
    aggregate_id: String,
    resource_owner: String,
    sequence: i64,
    event_type: String,
    payload: serde_json::Value,
    creator: String,
    created_at: DateTime<Utc>,
}

impl EventRow {
    fn into_stored(self) -> Result<StoredEvent> {
        Ok(StoredEvent {
            metadata: EventMetadata {
                event_id: EventId(self.event_id),
                event_type: self.event_type,
                aggregate: AggregateRef {
                    instance_id: self.instance_id,
                    aggregate_type: self.aggregate_type.parse()?,
                    id: self.aggregate_id,
                    resource_owner: self.resource_owner,
                },
                sequence: self.sequence as u64,
                created_at: self.created_at,
                creator: self.creator,
            },
            payload: self.payload,
        })
    }
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &EventFilter) {
    query
        .push("instance_id = ")
        .push_bind(filter.instance_id.clone());
    query
        .push(" AND aggregate_type = ")
        .push_bind(filter.aggregate_type.as_str());
    if !filter.aggregate_ids.is_empty() {
        query
            .push(" AND aggregate_id = ANY(")
            .push_bind(filter.aggregate_ids.clone())
            .push(")");
    }
    if let Some(owner) = &filter.resource_owner {
        query.push(" AND resource_owner = ").push_bind(owner.clone());
    }
    if !filter.event_types.is_empty() {
        query
            .push(" AND event_type = ANY(")
            .push_bind(filter.event_types.clone())
            .push(")");
    }
}

/// Advisory lock taken for the duration of a push transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AdvisoryLock {
    key: String,
    exclusive: bool,
}

/// Locks a batch needs, sorted by key so concurrent pushes acquire them in the
/// same order.
///
/// A stream is locked exclusively. Its aggregate type is locked shared, so a
/// guard spanning every aggregate of a type (no ids) can lock the type
/// exclusively and still exclude single-stream writers.
fn advisory_locks(batch: &PushBatch) -> Vec<AdvisoryLock> {
    let mut locks: BTreeMap<String, bool> = BTreeMap::new();
    let mut lock = |key: String, exclusive: bool| {
        let entry = locks.entry(key).or_insert(false);
        *entry |= exclusive;
    };

    for pending in &batch.events {
        let aggregate = &pending.aggregate;
        let type_key = format!("{}/{}", aggregate.instance_id, aggregate.aggregate_type.as_str());
        lock(format!("{}/{}", type_key, aggregate.id), true);
        lock(type_key, false);
    }

    for guard in &batch.guards {
        let filter = &guard.filter;
        let type_key = format!("{}/{}", filter.instance_id, filter.aggregate_type.as_str());
        for id in &filter.aggregate_ids {
            lock(format!("{}/{}", type_key, id), true);
        }
        let exclusive = filter.aggregate_ids.is_empty();
        lock(type_key, exclusive);
    }

    locks
        .into_iter()
        .map(|(key, exclusive)| AdvisoryLock { key, exclusive })
        .collect()
}

/// Unique violations mean another writer took the sequence first.
fn map_insert_error(error: sqlx::Error) -> AegisError {
    if let sqlx::Error::Database(db_err) = &error {
        if db_err.code().as_deref() == Some("23505") {
            return conflict(db_err.message().to_string());
        }
    }
    AegisError::from(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::{AggregateType, PendingEvent, ProjectEvent};
    use crate::events::log::ConcurrencyGuard;

    fn pending(project: &str, event: ProjectEvent) -> PendingEvent {
        event
            .into_pending(AggregateRef::project("inst", project, "org"), "user")
            .unwrap()
    }

    fn keys(locks: &[AdvisoryLock]) -> Vec<(&str, bool)> {
        locks.iter().map(|l| (l.key.as_str(), l.exclusive)).collect()
    }

    #[test]
    fn test_stream_locks_are_deduplicated_and_sorted() {
        let batch = PushBatch::new(vec![
            pending("p2", ProjectEvent::metadata_set("a", "k", b"v".to_vec())),
            pending("p1", ProjectEvent::metadata_set("a", "k", b"v".to_vec())),
            pending("p2", ProjectEvent::metadata_removed("a", "k")),
        ])
        .with_guard(ConcurrencyGuard::new(
            EventFilter::new("inst", AggregateType::Project).aggregate_id("p2"),
            4,
        ));

        assert_eq!(
            keys(&advisory_locks(&batch)),
            vec![
                ("inst/project", false),
                ("inst/project/p1", true),
                ("inst/project/p2", true),
            ]
        );
    }

    #[test]
    fn test_type_wide_guard_locks_type_exclusively() {
        let events = vec![pending("p1", ProjectEvent::metadata_removed_all("a"))];
        let guard = ConcurrencyGuard::new(EventFilter::new("inst", AggregateType::Project), 0);
        let batch = PushBatch::new(events).with_guard(guard);

        assert_eq!(
            keys(&advisory_locks(&batch)),
            vec![("inst/project", true), ("inst/project/p1", true)]
        );
    }

    #[test]
    fn test_empty_batch_takes_no_locks() {
        assert!(advisory_locks(&PushBatch::default()).is_empty());
    }
}
