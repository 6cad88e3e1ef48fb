//! Application metadata commands.

use std::collections::BTreeMap;
use tracing::{info, instrument};

use super::{
    ApplicationRef, Commands, MetadataListWriteModel, MetadataWriteModel, RequestContext,
    WriteModel,
};
use crate::domain::{Metadata, MetadataDetails, ObjectDetails};
use crate::error::{AegisError, Result};
use crate::events::{ProjectEvent, PushBatch};

fn invalid_metadata(code: &'static str) -> AegisError {
    AegisError::invalid_argument(code, "Errors.Metadata.Invalid")
}

impl Commands {
    /// Set one metadata entry, overwriting any previous value.
    #[instrument(
        skip(self, ctx, metadata),
        fields(instance_id = %ctx.instance_id, project_id = %app.project_id, app_id = %app.app_id, key = %metadata.key)
    )]
    pub async fn set_application_metadata(
        &self,
        ctx: &RequestContext,
        resource_owner: &str,
        app: &ApplicationRef,
        metadata: Metadata,
    ) -> Result<MetadataDetails> {
        app.validate()?;
        self.ensure_application_exists(ctx, resource_owner, app).await?;
        if !metadata.is_valid() {
            return Err(invalid_metadata("META-2ml0f"));
        }

        let aggregate = app.aggregate(ctx, resource_owner);
        let mut model = MetadataWriteModel::new(aggregate.clone(), &app.app_id, &metadata.key);
        let event = ProjectEvent::metadata_set(&app.app_id, metadata.key, metadata.value)
            .into_pending(aggregate, &ctx.user_id)?;

        self.push_and_apply("set", PushBatch::new(vec![event]), &mut model)
            .await?;

        Ok(model.to_details())
    }

    /// Set many entries in one atomic batch.
    ///
    /// Every entry is validated first; one invalid entry rejects the batch.
    #[instrument(
        skip(self, ctx, metadata),
        fields(instance_id = %ctx.instance_id, project_id = %app.project_id, app_id = %app.app_id, count = metadata.len())
    )]
    pub async fn bulk_set_application_metadata(
        &self,
        ctx: &RequestContext,
        resource_owner: &str,
        app: &ApplicationRef,
        metadata: Vec<Metadata>,
    ) -> Result<ObjectDetails> {
        app.validate()?;
        if metadata.is_empty() {
            return Err(AegisError::precondition_failed("META-9mm2d", "Errors.Metadata.NoData"));
        }
        self.ensure_application_exists(ctx, resource_owner, app).await?;
        if let Some(invalid) = metadata.iter().find(|m| !m.is_valid()) {
            return Err(invalid_metadata("META-2ml0f").with_context("key", &invalid.key));
        }

        let aggregate = app.aggregate(ctx, resource_owner);
        let events = metadata
            .into_iter()
            .map(|m| {
                ProjectEvent::metadata_set(&app.app_id, m.key, m.value)
                    .into_pending(aggregate.clone(), &ctx.user_id)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut model = MetadataListWriteModel::new(aggregate, &app.app_id);
        self.push_and_apply("bulk_set", PushBatch::new(events), &mut model)
            .await?;

        Ok(model.details())
    }

    /// Remove one existing entry.
    #[instrument(
        skip(self, ctx),
        fields(instance_id = %ctx.instance_id, project_id = %app.project_id, app_id = %app.app_id)
    )]
    pub async fn remove_application_metadata(
        &self,
        ctx: &RequestContext,
        resource_owner: &str,
        app: &ApplicationRef,
        key: &str,
    ) -> Result<ObjectDetails> {
        app.validate()?;
        if key.is_empty() {
            return Err(invalid_metadata("META-2n0f1"));
        }
        self.ensure_application_exists(ctx, resource_owner, app).await?;

        let aggregate = app.aggregate(ctx, resource_owner);
        let mut model = MetadataWriteModel::new(aggregate.clone(), &app.app_id, key);
        self.load(&mut model).await?;
        if !model.exists() {
            return Err(AegisError::not_found("META-mcnw3", "Errors.Metadata.NotFound")
                .with_context("key", key));
        }

        let event = ProjectEvent::metadata_removed(&app.app_id, key)
            .into_pending(aggregate, &ctx.user_id)?;
        let batch = PushBatch::new(vec![event]).with_guard(model.guard());
        self.push_and_apply("remove", batch, &mut model).await?;

        Ok(model.scope.details())
    }

    /// Remove several existing entries in one atomic batch.
    ///
    /// Empty keys are rejected before missing keys are reported, wherever
    /// they appear in `keys`.
    #[instrument(
        skip(self, ctx, keys),
        fields(instance_id = %ctx.instance_id, project_id = %app.project_id, app_id = %app.app_id, count = keys.len())
    )]
    pub async fn bulk_remove_application_metadata(
        &self,
        ctx: &RequestContext,
        resource_owner: &str,
        app: &ApplicationRef,
        keys: &[String],
    ) -> Result<ObjectDetails> {
        app.validate()?;
        if keys.is_empty() {
            return Err(AegisError::precondition_failed("META-9mw2d", "Errors.Metadata.NoData"));
        }
        self.ensure_application_exists(ctx, resource_owner, app).await?;

        let aggregate = app.aggregate(ctx, resource_owner);
        let mut model = MetadataListWriteModel::new(aggregate.clone(), &app.app_id);
        self.load(&mut model).await?;

        if keys.iter().any(|key| key.is_empty()) {
            return Err(invalid_metadata("COMMAND-m19ds"));
        }
        if let Some(missing) = keys.iter().find(|key| !model.contains(key)) {
            return Err(AegisError::not_found("META-2npds", "Errors.Metadata.KeyNotExisting")
                .with_context("key", missing));
        }

        let events = keys
            .iter()
            .map(|key| {
                ProjectEvent::metadata_removed(&app.app_id, key)
                    .into_pending(aggregate.clone(), &ctx.user_id)
            })
            .collect::<Result<Vec<_>>>()?;
        let batch = PushBatch::new(events).with_guard(model.guard());
        self.push_and_apply("bulk_remove", batch, &mut model).await?;

        info!(removed = keys.len(), "Application metadata removed");
        Ok(model.details())
    }

    /// Current metadata of an application, replayed from the log.
    pub async fn application_metadata(
        &self,
        ctx: &RequestContext,
        resource_owner: &str,
        app: &ApplicationRef,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        app.validate()?;
        let aggregate = app.aggregate(ctx, resource_owner);
        let mut model = MetadataListWriteModel::new(aggregate, &app.app_id);
        self.load(&mut model).await?;
        Ok(model.metadata)
    }
}
