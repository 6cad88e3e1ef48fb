//! Event definitions for the project aggregate family.
//!
//! This module provides:
//! - Aggregate references and stored/pending event envelopes
//! - The closed [`ProjectEvent`] union and its payloads
//! - Factory constructors turning command intent into [`PendingEvent`]s

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AegisError, ErrorContext, Result};

/// Event type strings as persisted in the log.
pub mod event_types {
    pub const APPLICATION_ADDED: &str = "project.application.added";
    pub const APPLICATION_REMOVED: &str = "project.application.removed";
    pub const APPLICATION_METADATA_SET: &str = "project.application.metadata.set";
    pub const APPLICATION_METADATA_REMOVED: &str = "project.application.metadata.removed";
    pub const APPLICATION_METADATA_REMOVED_ALL: &str = "project.application.metadata.removed.all";

    /// Every type the project family can emit.
    pub const ALL: &[&str] = &[
        APPLICATION_ADDED,
        APPLICATION_REMOVED,
        APPLICATION_METADATA_SET,
        APPLICATION_METADATA_REMOVED,
        APPLICATION_METADATA_REMOVED_ALL,
    ];
}

// =============================================================================
// Event IDs
// =============================================================================

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// Known aggregate types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateType {
    Project,
}

impl AggregateType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
        }
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateType {
    type Err = AegisError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "project" => Ok(Self::Project),
            other => Err(AegisError::internal(
                "EVENT-aGgT9",
                format!("unknown aggregate type: {}", other),
            )),
        }
    }
}

/// Identifies one consistency boundary within one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateRef {
    /// Tenant the aggregate lives in
    pub instance_id: String,
    pub aggregate_type: AggregateType,
    pub id: String,
    pub resource_owner: String,
}

impl AggregateRef {
    pub fn project(
        instance_id: impl Into<String>,
        project_id: impl Into<String>,
        resource_owner: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            aggregate_type: AggregateType::Project,
            id: project_id.into(),
            resource_owner: resource_owner.into(),
        }
    }

    /// Same tenant, type and id. Sequences are scoped by this triple.
    pub fn same_stream(&self, other: &AggregateRef) -> bool {
        self.instance_id == other.instance_id
            && self.aggregate_type == other.aggregate_type
            && self.id == other.id
    }
}

// =============================================================================
// Event Envelopes
// =============================================================================

/// Metadata assigned by the log when an event is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: EventId,
    pub event_type: String,
    pub aggregate: AggregateRef,

    /// Position within the aggregate, gapless and starting at 1
    pub sequence: u64,

    pub created_at: DateTime<Utc>,

    /// User that triggered the event
    pub creator: String,
}

/// An event as read back from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub metadata: EventMetadata,
    pub payload: serde_json::Value,
}

impl StoredEvent {
    pub fn event_type(&self) -> &str {
        &self.metadata.event_type
    }

    pub fn sequence(&self) -> u64 {
        self.metadata.sequence
    }
}

/// An event that has been built but not yet pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    pub aggregate: AggregateRef,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub creator: String,
}

impl PendingEvent {
    /// Seal the event with the metadata the log assigns on append.
    pub fn into_stored(self, sequence: u64, created_at: DateTime<Utc>) -> StoredEvent {
        StoredEvent {
            metadata: EventMetadata {
                event_id: EventId::new(),
                event_type: self.event_type,
                aggregate: self.aggregate,
                sequence,
                created_at,
                creator: self.creator,
            },
            payload: self.payload,
        }
    }
}

// =============================================================================
// Project Event Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationAdded {
    pub app_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRemoved {
    pub app_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationMetadataSet {
    pub app_id: String,
    pub key: String,
    #[serde(with = "super::base64_bytes")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationMetadataRemoved {
    pub app_id: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationMetadataRemovedAll {
    pub app_id: String,
}

// =============================================================================
// Project Events
// =============================================================================

/// Every event the project aggregate can record.
///
/// Projections match on this exhaustively, so a new variant has to be
/// handled everywhere before the crate compiles again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectEvent {
    ApplicationAdded(ApplicationAdded),
    ApplicationRemoved(ApplicationRemoved),
    ApplicationMetadataSet(ApplicationMetadataSet),
    ApplicationMetadataRemoved(ApplicationMetadataRemoved),
    ApplicationMetadataRemovedAll(ApplicationMetadataRemovedAll),
}

impl ProjectEvent {
    pub fn application_added(app_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ApplicationAdded(ApplicationAdded {
            app_id: app_id.into(),
            name: name.into(),
        })
    }

    pub fn application_removed(app_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ApplicationRemoved(ApplicationRemoved {
            app_id: app_id.into(),
            name: name.into(),
        })
    }

    pub fn metadata_set(
        app_id: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self::ApplicationMetadataSet(ApplicationMetadataSet {
            app_id: app_id.into(),
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn metadata_removed(app_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self::ApplicationMetadataRemoved(ApplicationMetadataRemoved {
            app_id: app_id.into(),
            key: key.into(),
        })
    }

    pub fn metadata_removed_all(app_id: impl Into<String>) -> Self {
        Self::ApplicationMetadataRemovedAll(ApplicationMetadataRemovedAll {
            app_id: app_id.into(),
        })
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ApplicationAdded(_) => event_types::APPLICATION_ADDED,
            Self::ApplicationRemoved(_) => event_types::APPLICATION_REMOVED,
            Self::ApplicationMetadataSet(_) => event_types::APPLICATION_METADATA_SET,
            Self::ApplicationMetadataRemoved(_) => event_types::APPLICATION_METADATA_REMOVED,
            Self::ApplicationMetadataRemovedAll(_) => {
                event_types::APPLICATION_METADATA_REMOVED_ALL
            }
        }
    }

    /// The application (sub-entity) the event belongs to.
    pub fn app_id(&self) -> &str {
        match self {
            Self::ApplicationAdded(e) => &e.app_id,
            Self::ApplicationRemoved(e) => &e.app_id,
            Self::ApplicationMetadataSet(e) => &e.app_id,
            Self::ApplicationMetadataRemoved(e) => &e.app_id,
            Self::ApplicationMetadataRemovedAll(e) => &e.app_id,
        }
    }

    /// Serialize the payload as it is stored in the log.
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::ApplicationAdded(e) => serde_json::to_value(e),
            Self::ApplicationRemoved(e) => serde_json::to_value(e),
            Self::ApplicationMetadataSet(e) => serde_json::to_value(e),
            Self::ApplicationMetadataRemoved(e) => serde_json::to_value(e),
            Self::ApplicationMetadataRemovedAll(e) => serde_json::to_value(e),
        }
    }

    /// Build the pending event for `aggregate`, attributed to `creator`.
    pub fn into_pending(
        self,
        aggregate: AggregateRef,
        creator: impl Into<String>,
    ) -> Result<PendingEvent> {
        let payload = self.payload().internal_err("EVENT-pY1d0")?;
        Ok(PendingEvent {
            aggregate,
            event_type: self.event_type().to_string(),
            payload,
            creator: creator.into(),
        })
    }
}

/// A decoded event together with the metadata it was stored with.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub metadata: EventMetadata,
    pub event: ProjectEvent,
}
