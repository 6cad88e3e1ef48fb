//! The append-only event log seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::event::{AggregateType, EventMetadata, PendingEvent, StoredEvent};
use crate::error::{AegisError, Result};

/// Diagnostic code reported for every optimistic-concurrency rejection.
pub const CONFLICT_CODE: &str = "EVENT-zpK3c";
pub const CONFLICT_MESSAGE_KEY: &str = "Errors.Internal.Eventstore.Conflict";

pub(crate) fn conflict(detail: impl Into<String>) -> AegisError {
    AegisError::conflict(CONFLICT_CODE, CONFLICT_MESSAGE_KEY).with_internal_message(detail)
}

// =============================================================================
// Filters
// =============================================================================

/// Selects events of one tenant. Empty lists match everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub instance_id: String,
    pub aggregate_type: AggregateType,
    pub aggregate_ids: Vec<String>,
    pub resource_owner: Option<String>,
    pub event_types: Vec<String>,
}

impl EventFilter {
    pub fn new(instance_id: impl Into<String>, aggregate_type: AggregateType) -> Self {
        Self {
            instance_id: instance_id.into(),
            aggregate_type,
            aggregate_ids: Vec::new(),
            resource_owner: None,
            event_types: Vec::new(),
        }
    }

    pub fn aggregate_id(mut self, id: impl Into<String>) -> Self {
        self.aggregate_ids.push(id.into());
        self
    }

    pub fn resource_owner(mut self, owner: impl Into<String>) -> Self {
        self.resource_owner = Some(owner.into());
        self
    }

    pub fn event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types.extend(types.into_iter().map(Into::into));
        self
    }

    /// Whether a stored event falls inside this filter.
    pub fn matches(&self, metadata: &EventMetadata) -> bool {
        let aggregate = &metadata.aggregate;
        aggregate.instance_id == self.instance_id
            && aggregate.aggregate_type == self.aggregate_type
            && (self.aggregate_ids.is_empty() || self.aggregate_ids.contains(&aggregate.id))
            && self
                .resource_owner
                .as_ref()
                .map_or(true, |owner| *owner == aggregate.resource_owner)
            && (self.event_types.is_empty() || self.event_types.contains(&metadata.event_type))
    }
}

// =============================================================================
// Concurrency Guards
// =============================================================================

/// Expected-version check attached to a push.
///
/// The push is rejected with a conflict when any event inside `filter`
/// carries a sequence greater than `last_sequence`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyGuard {
    pub filter: EventFilter,
    pub last_sequence: u64,
}

impl ConcurrencyGuard {
    pub fn new(filter: EventFilter, last_sequence: u64) -> Self {
        Self {
            filter,
            last_sequence,
        }
    }

    /// Whether `metadata` was written after the guarded read.
    pub fn is_violated_by(&self, metadata: &EventMetadata) -> bool {
        self.filter.matches(metadata) && metadata.sequence > self.last_sequence
    }
}

// =============================================================================
// Batches
// =============================================================================

/// Events appended all-or-nothing, together with their guards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushBatch {
    pub events: Vec<PendingEvent>,
    pub guards: Vec<ConcurrencyGuard>,
}

impl PushBatch {
    pub fn new(events: Vec<PendingEvent>) -> Self {
        Self {
            events,
            guards: Vec::new(),
        }
    }

    pub fn with_guard(mut self, guard: ConcurrencyGuard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// =============================================================================
// Event Log
// =============================================================================

/// Durable, ordered, per-aggregate event storage.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Atomically append every event in the batch.
    ///
    /// Sequences are assigned per aggregate. Any violated guard or a lost
    /// race on a sequence fails the whole batch with a conflict.
    async fn push(&self, batch: PushBatch) -> Result<Vec<StoredEvent>>;

    /// Events matching `filter`, ordered as they were appended.
    async fn query(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::{AggregateRef, ProjectEvent};
    use chrono::Utc;

    fn metadata(event: ProjectEvent, owner: &str, sequence: u64) -> EventMetadata {
        event
            .into_pending(AggregateRef::project("inst", "proj", owner), "user")
            .unwrap()
            .into_stored(sequence, Utc::now())
            .metadata
    }

    #[test]
    fn test_filter_matching() {
        let filter = EventFilter::new("inst", AggregateType::Project)
            .aggregate_id("proj")
            .resource_owner("org")
            .event_types(["project.application.metadata.set"]);

        assert!(filter.matches(&metadata(ProjectEvent::metadata_set("a", "k", b"v".to_vec()), "org", 1)));
        assert!(!filter.matches(&metadata(ProjectEvent::metadata_set("a", "k", b"v".to_vec()), "other", 1)));
        assert!(!filter.matches(&metadata(ProjectEvent::metadata_removed("a", "k"), "org", 1)));
    }

    #[test]
    fn test_empty_filter_lists_match_everything() {
        let filter = EventFilter::new("inst", AggregateType::Project);
        assert!(filter.matches(&metadata(ProjectEvent::application_added("a", "web"), "org", 3)));

        let other_tenant = EventFilter::new("inst-2", AggregateType::Project);
        assert!(!other_tenant.matches(&metadata(ProjectEvent::application_added("a", "web"), "org", 3)));
    }

    #[test]
    fn test_guard_violation() {
        let guard = ConcurrencyGuard::new(EventFilter::new("inst", AggregateType::Project), 2);
        assert!(!guard.is_violated_by(&metadata(ProjectEvent::metadata_removed_all("a"), "org", 2)));
        assert!(guard.is_violated_by(&metadata(ProjectEvent::metadata_removed_all("a"), "org", 3)));
    }
}
