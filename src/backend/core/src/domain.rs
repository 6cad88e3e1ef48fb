//! Domain value types shared by commands and projections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Metadata
// =============================================================================

/// A key/value pair attached to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub key: String,
    #[serde(with = "crate::events::base64_bytes")]
    pub value: Vec<u8>,
}

impl Metadata {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Both key and value must be non-empty.
    pub fn is_valid(&self) -> bool {
        !self.key.is_empty() && !self.value.is_empty()
    }
}

/// Lifecycle of a single metadata key as derived from its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataState {
    #[default]
    Unspecified,
    Active,
    Removed,
}

impl MetadataState {
    pub fn exists(&self) -> bool {
        matches!(self, Self::Active)
    }
}

// =============================================================================
// Object Details
// =============================================================================

/// Aggregate-level facts reported after a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDetails {
    /// Sequence of the last event applied
    pub sequence: u64,
    pub change_date: DateTime<Utc>,
    pub resource_owner: String,
}

/// Result of setting a single metadata entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataDetails {
    pub details: ObjectDetails,
    pub key: String,
    #[serde(with = "crate::events::base64_bytes")]
    pub value: Vec<u8>,
    pub state: MetadataState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_validity() {
        assert!(Metadata::new("color", "blue").is_valid());
        assert!(!Metadata::new("", "blue").is_valid());
        assert!(!Metadata::new("color", Vec::new()).is_valid());
    }

    #[test]
    fn test_metadata_state_exists() {
        assert!(MetadataState::Active.exists());
        assert!(!MetadataState::Removed.exists());
        assert!(!MetadataState::default().exists());
    }
}
