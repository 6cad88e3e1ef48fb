//! Process-local event log.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, instrument};

use super::event::{AggregateRef, AggregateType, StoredEvent};
use super::log::{conflict, EventFilter, EventLog, PushBatch};
use crate::error::{AegisError, Result};

/// In-memory [`EventLog`] with the same ordering and concurrency rules as a
/// durable one.
///
/// The whole push runs under one write lock, so guards are checked and
/// sequences assigned against a single consistent view.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    events: RwLock<Vec<StoredEvent>>,
    unavailable: AtomicBool,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every push and query fails until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of everything appended so far.
    pub fn events(&self) -> Vec<StoredEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AegisError::internal("EVENT-0ffL1", "event log unavailable"));
        }
        Ok(())
    }
}

fn last_sequence(events: &[StoredEvent], aggregate: &AggregateRef) -> u64 {
    events
        .iter()
        .rev()
        .find(|e| e.metadata.aggregate.same_stream(aggregate))
        .map_or(0, |e| e.metadata.sequence)
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    #[instrument(skip(self, batch), fields(events = batch.len(), guards = batch.guards.len()))]
    async fn push(&self, batch: PushBatch) -> Result<Vec<StoredEvent>> {
        self.check_available()?;

        let mut events = self.events.write();

        for guard in &batch.guards {
            if let Some(newer) = events.iter().find(|e| guard.is_violated_by(&e.metadata)) {
                return Err(conflict(format!(
                    "event {} at sequence {} is newer than expected {}",
                    newer.metadata.event_type, newer.metadata.sequence, guard.last_sequence
                )));
            }
        }

        let now = Utc::now();
        let mut next: HashMap<(String, AggregateType, String), u64> = HashMap::new();
        let mut appended = Vec::with_capacity(batch.events.len());
        for pending in batch.events {
            let key = (
                pending.aggregate.instance_id.clone(),
                pending.aggregate.aggregate_type,
                pending.aggregate.id.clone(),
            );
            let sequence = next
                .entry(key)
                .or_insert_with(|| last_sequence(&events, &pending.aggregate));
            *sequence += 1;
            appended.push(pending.into_stored(*sequence, now));
        }

        events.extend(appended.iter().cloned());
        debug!(appended = appended.len(), "Events appended");

        Ok(appended)
    }

    async fn query(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>> {
        self.check_available()?;

        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| filter.matches(&e.metadata))
            .cloned()
            .collect())
    }
}
