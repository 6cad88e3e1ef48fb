//! Tenant-scoped cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of a pushed authorization request.
///
/// The tenant is part of the key, so identical request URIs issued by two
/// instances never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParCacheKey {
    pub instance_id: String,
    pub request_uri: String,
}

impl ParCacheKey {
    pub fn new(instance_id: impl Into<String>, request_uri: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            request_uri: request_uri.into(),
        }
    }
}

impl fmt::Display for ParCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.instance_id, self.request_uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_embeds_tenant() {
        let a = ParCacheKey::new("inst-a", "urn:par:1");
        let b = ParCacheKey::new("inst-b", "urn:par:1");
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "inst-a-urn:par:1");
    }

    #[test]
    fn test_separator_does_not_merge_keys() {
        // "a-b" + "c" and "a" + "b-c" render alike but stay distinct keys.
        let left = ParCacheKey::new("a-b", "c");
        let right = ParCacheKey::new("a", "b-c");
        assert_eq!(left.to_string(), right.to_string());
        assert_ne!(left, right);
    }
}
