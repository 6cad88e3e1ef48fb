//! Write models: projections of the project event stream used to validate
//! commands and report their outcome.
//!
//! A write model starts at its empty state and folds each recorded event via
//! `apply`. The stream is shared by every application of a project, so each
//! model drops events that belong to another application.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::domain::{MetadataDetails, MetadataState, ObjectDetails};
use crate::events::{
    event_types, AggregateRef, ConcurrencyGuard, EventFilter, ProjectEvent, RecordedEvent,
};

// =============================================================================
// Write Model Trait
// =============================================================================

/// A projection that can be rebuilt from a filtered event stream.
pub trait WriteModel {
    /// The slice of the log this model reads.
    fn filter(&self) -> EventFilter;

    /// Fold a single recorded event.
    ///
    /// Implementations must not perform I/O or fail; every persisted event is
    /// valid by definition.
    fn apply(&mut self, event: &RecordedEvent);

    /// Last stream sequence observed, including events of other applications.
    fn position(&self) -> u64;

    /// Expected-version guard for a push based on this model.
    fn guard(&self) -> ConcurrencyGuard {
        ConcurrencyGuard::new(self.filter(), self.position())
    }

    fn reduce<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a RecordedEvent>,
        Self: Sized,
    {
        for event in events {
            self.apply(event);
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// Scope and bookkeeping common to every application-level model.
#[derive(Debug, Clone)]
pub struct ApplicationScope {
    pub aggregate: AggregateRef,
    pub app_id: String,

    /// Last sequence seen in the filtered stream
    pub position: u64,

    /// Last sequence that belonged to this application
    pub sequence: u64,
    pub change_date: Option<DateTime<Utc>>,
}

impl ApplicationScope {
    pub fn new(aggregate: AggregateRef, app_id: impl Into<String>) -> Self {
        Self {
            aggregate,
            app_id: app_id.into(),
            position: 0,
            sequence: 0,
            change_date: None,
        }
    }

    fn filter(&self, types: &[&str]) -> EventFilter {
        EventFilter::new(
            self.aggregate.instance_id.clone(),
            self.aggregate.aggregate_type,
        )
        .aggregate_id(self.aggregate.id.clone())
        .resource_owner(self.aggregate.resource_owner.clone())
        .event_types(types.iter().copied())
    }

    /// Record the event position; returns whether the event is ours.
    fn observe(&mut self, recorded: &RecordedEvent) -> bool {
        self.position = self.position.max(recorded.metadata.sequence);
        if recorded.event.app_id() != self.app_id {
            return false;
        }
        self.sequence = recorded.metadata.sequence;
        self.change_date = Some(recorded.metadata.created_at);
        true
    }

    pub fn details(&self) -> ObjectDetails {
        ObjectDetails {
            sequence: self.sequence,
            change_date: self.change_date.unwrap_or_else(Utc::now),
            resource_owner: self.aggregate.resource_owner.clone(),
        }
    }
}

const METADATA_EVENT_TYPES: &[&str] = &[
    event_types::APPLICATION_METADATA_SET,
    event_types::APPLICATION_METADATA_REMOVED,
    event_types::APPLICATION_METADATA_REMOVED_ALL,
];

// =============================================================================
// Single-Key Metadata Model
// =============================================================================

/// Current value of one metadata key of one application.
#[derive(Debug, Clone)]
pub struct MetadataWriteModel {
    pub scope: ApplicationScope,
    pub key: String,
    pub value: Vec<u8>,
    pub state: MetadataState,
}

impl MetadataWriteModel {
    pub fn new(aggregate: AggregateRef, app_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            scope: ApplicationScope::new(aggregate, app_id),
            key: key.into(),
            value: Vec::new(),
            state: MetadataState::Unspecified,
        }
    }

    pub fn exists(&self) -> bool {
        self.state.exists()
    }

    pub fn to_details(&self) -> MetadataDetails {
        MetadataDetails {
            details: self.scope.details(),
            key: self.key.clone(),
            value: self.value.clone(),
            state: self.state,
        }
    }
}

impl WriteModel for MetadataWriteModel {
    fn filter(&self) -> EventFilter {
        self.scope.filter(METADATA_EVENT_TYPES)
    }

    fn apply(&mut self, recorded: &RecordedEvent) {
        if !self.scope.observe(recorded) {
            return;
        }

        match &recorded.event {
            ProjectEvent::ApplicationMetadataSet(e) => {
                if e.key == self.key {
                    self.value = e.value.clone();
                    self.state = MetadataState::Active;
                }
            }
            ProjectEvent::ApplicationMetadataRemoved(e) => {
                if e.key == self.key {
                    self.value.clear();
                    self.state = MetadataState::Removed;
                }
            }
            ProjectEvent::ApplicationMetadataRemovedAll(_) => {
                if self.state.exists() {
                    self.value.clear();
                    self.state = MetadataState::Removed;
                }
            }
            ProjectEvent::ApplicationAdded(_) | ProjectEvent::ApplicationRemoved(_) => {}
        }
    }

    fn position(&self) -> u64 {
        self.scope.position
    }
}

// =============================================================================
// Metadata List Model
// =============================================================================

/// Every live metadata entry of one application.
#[derive(Debug, Clone)]
pub struct MetadataListWriteModel {
    pub scope: ApplicationScope,
    pub metadata: BTreeMap<String, Vec<u8>>,
}

impl MetadataListWriteModel {
    pub fn new(aggregate: AggregateRef, app_id: impl Into<String>) -> Self {
        Self {
            scope: ApplicationScope::new(aggregate, app_id),
            metadata: BTreeMap::new(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }

    pub fn details(&self) -> ObjectDetails {
        self.scope.details()
    }
}

impl WriteModel for MetadataListWriteModel {
    fn filter(&self) -> EventFilter {
        self.scope.filter(METADATA_EVENT_TYPES)
    }

    fn apply(&mut self, recorded: &RecordedEvent) {
        if !self.scope.observe(recorded) {
            return;
        }

        match &recorded.event {
            ProjectEvent::ApplicationMetadataSet(e) => {
                self.metadata.insert(e.key.clone(), e.value.clone());
            }
            ProjectEvent::ApplicationMetadataRemoved(e) => {
                self.metadata.remove(&e.key);
            }
            ProjectEvent::ApplicationMetadataRemovedAll(_) => {
                self.metadata.clear();
            }
            ProjectEvent::ApplicationAdded(_) | ProjectEvent::ApplicationRemoved(_) => {}
        }
    }

    fn position(&self) -> u64 {
        self.scope.position
    }
}

// =============================================================================
// Application Existence Model
// =============================================================================

/// Whether an application is currently part of its project.
#[derive(Debug, Clone)]
pub struct ApplicationWriteModel {
    pub scope: ApplicationScope,
    pub name: String,
    pub exists: bool,
}

impl ApplicationWriteModel {
    pub fn new(aggregate: AggregateRef, app_id: impl Into<String>) -> Self {
        Self {
            scope: ApplicationScope::new(aggregate, app_id),
            name: String::new(),
            exists: false,
        }
    }
}

impl WriteModel for ApplicationWriteModel {
    fn filter(&self) -> EventFilter {
        self.scope.filter(&[
            event_types::APPLICATION_ADDED,
            event_types::APPLICATION_REMOVED,
        ])
    }

    fn apply(&mut self, recorded: &RecordedEvent) {
        if !self.scope.observe(recorded) {
            return;
        }

        match &recorded.event {
            ProjectEvent::ApplicationAdded(e) => {
                self.name = e.name.clone();
                self.exists = true;
            }
            ProjectEvent::ApplicationRemoved(_) => {
                self.exists = false;
            }
            ProjectEvent::ApplicationMetadataSet(_)
            | ProjectEvent::ApplicationMetadataRemoved(_)
            | ProjectEvent::ApplicationMetadataRemovedAll(_) => {}
        }
    }

    fn position(&self) -> u64 {
        self.scope.position
    }
}
