//! Event-type string to decoder registry.
//!
//! Stored events only carry their type as a string. The registry maps each
//! known string to a decoder producing a typed [`ProjectEvent`]; an unknown
//! type is an internal error, never silently skipped.

use std::collections::HashMap;

use super::event::{event_types, ProjectEvent, RecordedEvent, StoredEvent};
use crate::error::{AegisError, ErrorContext, Result};

/// Decodes a stored payload into a typed event.
pub type Decoder = fn(&serde_json::Value) -> serde_json::Result<ProjectEvent>;

/// Maps event-type strings to payload decoders.
#[derive(Clone, Default)]
pub struct EventRegistry {
    decoders: HashMap<String, Decoder>,
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every project event decoder.
    pub fn project() -> Self {
        let mut registry = Self::new();
        registry.register(event_types::APPLICATION_ADDED, |v| {
            serde_json::from_value(v.clone()).map(ProjectEvent::ApplicationAdded)
        });
        registry.register(event_types::APPLICATION_REMOVED, |v| {
            serde_json::from_value(v.clone()).map(ProjectEvent::ApplicationRemoved)
        });
        registry.register(event_types::APPLICATION_METADATA_SET, |v| {
            serde_json::from_value(v.clone()).map(ProjectEvent::ApplicationMetadataSet)
        });
        registry.register(event_types::APPLICATION_METADATA_REMOVED, |v| {
            serde_json::from_value(v.clone()).map(ProjectEvent::ApplicationMetadataRemoved)
        });
        registry.register(event_types::APPLICATION_METADATA_REMOVED_ALL, |v| {
            serde_json::from_value(v.clone()).map(ProjectEvent::ApplicationMetadataRemovedAll)
        });
        registry
    }

    /// Register (or replace) the decoder for `event_type`.
    pub fn register(&mut self, event_type: impl Into<String>, decoder: Decoder) {
        self.decoders.insert(event_type.into(), decoder);
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Fail fast when any of `event_types` has no decoder.
    pub fn ensure_registered(&self, event_types: &[&str]) -> Result<()> {
        match event_types.iter().find(|t| !self.is_registered(t)) {
            Some(missing) => Err(unregistered(missing)),
            None => Ok(()),
        }
    }

    /// Decode a stored event.
    pub fn decode(&self, stored: &StoredEvent) -> Result<RecordedEvent> {
        let decoder = self
            .decoders
            .get(stored.event_type())
            .ok_or_else(|| unregistered(stored.event_type()))?;

        let event = decoder(&stored.payload).internal_err("APPLICATION-1m9e3")?;
        Ok(RecordedEvent {
            metadata: stored.metadata.clone(),
            event,
        })
    }

    /// Decode a whole stream, stopping at the first failure.
    pub fn decode_all(&self, stored: &[StoredEvent]) -> Result<Vec<RecordedEvent>> {
        stored.iter().map(|event| self.decode(event)).collect()
    }
}

fn unregistered(event_type: &str) -> AegisError {
    AegisError::internal(
        "EVENT-Rg4t1",
        format!("no decoder registered for event type {}", event_type),
    )
    .with_context("event_type", event_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::event::AggregateRef;
    use chrono::Utc;

    fn stored(event: ProjectEvent) -> StoredEvent {
        event
            .into_pending(AggregateRef::project("inst", "proj", "org"), "user")
            .unwrap()
            .into_stored(1, Utc::now())
    }

    #[test]
    fn test_project_registry_covers_every_type() {
        let registry = EventRegistry::project();
        assert!(registry.ensure_registered(event_types::ALL).is_ok());
    }

    #[test]
    fn test_ensure_registered_names_missing_type() {
        let registry = EventRegistry::new();
        let err = registry
            .ensure_registered(&[event_types::APPLICATION_ADDED])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.code(), "EVENT-Rg4t1");
        assert_eq!(
            err.context().get("event_type"),
            Some(&serde_json::json!(event_types::APPLICATION_ADDED))
        );
    }

    #[test]
    fn test_decode_metadata_set() {
        let registry = EventRegistry::project();
        let recorded = registry
            .decode(&stored(ProjectEvent::metadata_set("app", "k", b"v".to_vec())))
            .unwrap();

        assert_eq!(recorded.event, ProjectEvent::metadata_set("app", "k", b"v".to_vec()));
        assert_eq!(recorded.metadata.sequence, 1);
    }

    #[test]
    fn test_decode_unregistered_type_is_internal() {
        let registry = EventRegistry::project();
        let mut event = stored(ProjectEvent::metadata_removed_all("app"));
        event.metadata.event_type = "project.renamed".to_string();

        let err = registry.decode(&event).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.code(), "EVENT-Rg4t1");
    }

    #[test]
    fn test_decode_malformed_payload_is_internal() {
        let registry = EventRegistry::project();
        let mut event = stored(ProjectEvent::metadata_removed("app", "k"));
        event.payload = serde_json::json!({ "unexpected": true });

        let err = registry.decode(&event).unwrap_err();
        assert_eq!(err.code(), "APPLICATION-1m9e3");
    }
}
