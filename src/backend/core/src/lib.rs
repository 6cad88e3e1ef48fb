#![allow(clippy::result_large_err)]
//! # Aegis Core
//!
//! Write-side core of an identity and access management backend.
//!
//! ## Architecture
//!
//! - **Events**: Closed event schema, decoder registry and the append-only `EventLog` seam
//! - **Commands**: Validated commands that replay write models and push atomic batches
//!   under optimistic concurrency
//! - **Cache**: Tiered cache for pushed authorization requests (bounded LRU + durable store)
//! - **Telemetry**: Structured logging with sensitive-field redaction
//! - **Config**: Environment and file based configuration

pub mod cache;
pub mod command;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod events;
pub mod telemetry;

pub use error::{AegisError, ErrorContext, ErrorKind, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{
        AuthRequest, InMemoryParStore, ParCacheConfig, ParCacheKey, ParCacheStats, ParStore,
        PgParStore, PushedAuthRequestCache, PushedAuthRequestRepository,
    };
    pub use crate::command::{
        ApplicationProbe, ApplicationRef, Commands, EventLogApplicationProbe, RequestContext,
        WriteModel,
    };
    pub use crate::domain::{Metadata, MetadataDetails, MetadataState, ObjectDetails};
    pub use crate::error::{AegisError, ErrorContext, ErrorKind, ErrorSeverity, Result};
    pub use crate::events::{
        AggregateRef, ConcurrencyGuard, EventFilter, EventLog, EventRegistry, InMemoryEventLog,
        PgEventLog, ProjectEvent, PushBatch, RecordedEvent, StoredEvent,
    };
}
