//! Event Sourcing System
//!
//! - **`event`**: Aggregate references, stored/pending envelopes and the closed
//!   `ProjectEvent` union with its factory constructors.
//! - **`registry`**: Event-type string to decoder mapping, validated at startup.
//! - **`log`**: The `EventLog` trait with filters, concurrency guards and batches.
//! - **`memory`**: Process-local `EventLog` used by tests and embedded setups.
//! - **`postgres`**: `sqlx` adapter over an externally provisioned events table.

pub mod event;
pub mod log;
pub mod memory;
pub mod postgres;
pub mod registry;

pub use event::*;
pub use log::{ConcurrencyGuard, EventFilter, EventLog, PushBatch};
pub use memory::InMemoryEventLog;
pub use postgres::PgEventLog;
pub use registry::EventRegistry;

/// Serde adapter storing byte slices as standard base64 strings.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
