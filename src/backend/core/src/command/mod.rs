//! Command Engine
//!
//! Turns caller intent into validated, atomically appended events:
//!
//! - **`write_model`**: Projections replayed from the event log to check
//!   preconditions and report results.
//! - **`application_metadata`**: Set/remove commands for application metadata.
//!
//! Every command takes an explicit [`RequestContext`] naming the tenant and
//! the acting user. Commands never retry; a conflict is returned to the caller.

pub mod application_metadata;
pub mod write_model;

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::error::{AegisError, Result};
use crate::events::{AggregateRef, EventLog, EventRegistry, PushBatch, StoredEvent};

pub use write_model::{
    ApplicationScope, ApplicationWriteModel, MetadataListWriteModel, MetadataWriteModel,
    WriteModel,
};

// =============================================================================
// Request Scope
// =============================================================================

/// Tenant and actor of a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub instance_id: String,
    pub user_id: String,
}

impl RequestContext {
    pub fn new(instance_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// An application inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationRef {
    pub project_id: String,
    pub app_id: String,
}

impl ApplicationRef {
    pub fn new(project_id: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            app_id: app_id.into(),
        }
    }

    /// Both ids must be present.
    pub fn validate(&self) -> Result<()> {
        if self.project_id.is_empty() || self.app_id.is_empty() {
            return Err(AegisError::invalid_argument("META-983dF", "Errors.IDMissing"));
        }
        Ok(())
    }

    pub fn aggregate(&self, ctx: &RequestContext, resource_owner: &str) -> AggregateRef {
        AggregateRef::project(&ctx.instance_id, &self.project_id, resource_owner)
    }
}

// =============================================================================
// Existence Probe
// =============================================================================

/// Answers whether the owning application exists.
#[async_trait]
pub trait ApplicationProbe: Send + Sync {
    async fn application_exists(
        &self,
        ctx: &RequestContext,
        resource_owner: &str,
        app: &ApplicationRef,
    ) -> Result<bool>;
}

/// Probe replaying application added/removed events from the log.
#[derive(Clone)]
pub struct EventLogApplicationProbe {
    log: Arc<dyn EventLog>,
    registry: Arc<EventRegistry>,
}

impl EventLogApplicationProbe {
    pub fn new(log: Arc<dyn EventLog>, registry: Arc<EventRegistry>) -> Self {
        Self { log, registry }
    }
}

#[async_trait]
impl ApplicationProbe for EventLogApplicationProbe {
    async fn application_exists(
        &self,
        ctx: &RequestContext,
        resource_owner: &str,
        app: &ApplicationRef,
    ) -> Result<bool> {
        let mut model = ApplicationWriteModel::new(app.aggregate(ctx, resource_owner), &app.app_id);
        let stored = self.log.query(&model.filter()).await?;
        model.reduce(&self.registry.decode_all(&stored)?);
        Ok(model.exists)
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Entry point for every write.
#[derive(Clone)]
pub struct Commands {
    log: Arc<dyn EventLog>,
    probe: Arc<dyn ApplicationProbe>,
    registry: Arc<EventRegistry>,
}

impl Commands {
    pub fn new(
        log: Arc<dyn EventLog>,
        probe: Arc<dyn ApplicationProbe>,
        registry: Arc<EventRegistry>,
    ) -> Self {
        Self {
            log,
            probe,
            registry,
        }
    }

    /// Commands wired to the log-backed application probe.
    pub fn with_event_log(log: Arc<dyn EventLog>, registry: Arc<EventRegistry>) -> Self {
        let probe = Arc::new(EventLogApplicationProbe::new(log.clone(), registry.clone()));
        Self::new(log, probe, registry)
    }

    /// Fail with a precondition error unless the application exists.
    async fn ensure_application_exists(
        &self,
        ctx: &RequestContext,
        resource_owner: &str,
        app: &ApplicationRef,
    ) -> Result<()> {
        if !self.probe.application_exists(ctx, resource_owner, app).await? {
            return Err(AegisError::precondition_failed(
                "COMMAND-8fk3s",
                "Errors.Project.App.NotExisting",
            )
            .with_context("app_id", &app.app_id));
        }
        Ok(())
    }

    /// Rebuild `model` from its full history.
    async fn load<W: WriteModel + Send>(&self, model: &mut W) -> Result<()> {
        let stored = self.log.query(&model.filter()).await?;
        model.reduce(&self.registry.decode_all(&stored)?);
        Ok(())
    }

    /// Push the batch, then fold the appended events into `model`.
    ///
    /// A replay failure after a successful push does not undo the push; the
    /// caller receives an internal error and should re-read.
    #[instrument(skip(self, batch, model), fields(events = batch.len()))]
    async fn push_and_apply<W: WriteModel + Send>(
        &self,
        operation: &'static str,
        batch: PushBatch,
        model: &mut W,
    ) -> Result<Vec<StoredEvent>> {
        let appended = self.log.push(batch).await?;
        counter!("command_events_pushed_total", "operation" => operation)
            .increment(appended.len() as u64);

        match self.registry.decode_all(&appended) {
            Ok(recorded) => {
                model.reduce(&recorded);
                Ok(appended)
            }
            Err(err) => {
                warn!(operation, "Events appended but local replay failed");
                let detail = format!(
                    "replay after push failed: {}",
                    err.internal_message().unwrap_or_default()
                );
                let error =
                    AegisError::wrapping("COMMAND-r3Pl4", err).with_internal_message(detail);
                error.log();
                Err(error)
            }
        }
    }
}
