//! Command handlers
//!
//! Performs the cluster mutations described by [`Command`] values. Handlers
//! own idempotency: a job that already exists, a job that is already gone
//! or a status that already matches are all successful outcomes.

use crate::accessors::{JobApi, StreamResourceApi};
use crate::cache::StreamClassCache;
use crate::commands::{AnnotationTarget, Command, StreamClassRef};
use crate::conditions::{
    merge_conditions, stream_phase_conditions, ConditionFields, REASON_JOB_START_FAILED,
};
use crate::crd::stream_definition::{BACKFILL_JOB_TEMPLATE_REF_FIELD, JOB_TEMPLATE_REF_FIELD};
use crate::crd::{
    parse_dynamic, DynamicStream, StreamClass, StreamClassPhase, StreamClassStatus,
    StreamDefinition, StreamPhase, StreamRef, StreamStatus, StreamingJobTemplate,
};
use crate::error::{OperatorError, Result};
use crate::jobs::build_job;
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Executes commands against the cluster
#[derive(Clone)]
pub struct CommandHandler {
    resources: Arc<dyn StreamResourceApi>,
    jobs: Arc<dyn JobApi>,
    classes: Arc<StreamClassCache>,
}

impl CommandHandler {
    pub fn new(
        resources: Arc<dyn StreamResourceApi>,
        jobs: Arc<dyn JobApi>,
        classes: Arc<StreamClassCache>,
    ) -> Self {
        Self {
            resources,
            jobs,
            classes,
        }
    }

    /// Executes one command
    pub async fn handle(&self, command: &Command) -> Result<()> {
        debug!(command = command.name(), "Handling command");
        match command {
            Command::StartJob {
                definition,
                is_backfilling,
            } => self.start_job(definition, *is_backfilling).await,
            Command::StopJob { name, namespace } => self.stop_job(namespace, name).await,
            Command::SetAnnotation { target, key, value } => {
                self.annotate(target, key, Some(value), None).await
            }
            Command::RemoveAnnotation {
                target,
                key,
                expected,
            } => self.annotate(target, key, None, expected.as_deref()).await,
            Command::UpdateStatus { .. } => self.apply_status(command).await,
            Command::SetStreamClassStatus {
                class,
                phase,
                conditions,
            } => self.set_stream_class_status(class, *phase, conditions).await,
        }
    }

    /// Executes commands in order, stopping at the first failure
    pub async fn handle_all(&self, commands: &[Command]) -> Result<()> {
        for command in commands {
            self.handle(command).await.map_err(|e| {
                warn!(command = command.name(), error = %e, "Command failed");
                e
            })?;
        }
        Ok(())
    }

    async fn start_job(&self, definition: &DynamicStream, is_backfilling: bool) -> Result<()> {
        let stream = definition.reference();
        let job = match self.prepare_job(definition, is_backfilling).await {
            Ok(job) => job,
            Err(OperatorError::MissingReference(message))
            | Err(OperatorError::Configuration(message)) => {
                warn!(stream = %stream, "Cannot start job: {}", message);
                return self
                    .apply_status(&Command::set_internal_error_status(stream, &message))
                    .await;
            }
            Err(e) => return Err(e),
        };

        let namespace = definition.stream_namespace();
        match self.jobs.send_job(&job, &namespace).await {
            Ok(()) => {
                info!(
                    stream_id = %definition.stream_id(),
                    namespace = %namespace,
                    backfilling = is_backfilling,
                    "Started streaming job"
                );
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                info!(
                    stream_id = %definition.stream_id(),
                    namespace = %namespace,
                    "Streaming job already exists"
                );
                Ok(())
            }
            Err(e) => {
                error!(stream = %stream, error = %e, "Failed to start streaming job");
                let message = format!("Failed to start job: {}", e);
                self.update_status(
                    &stream,
                    StreamPhase::Failed,
                    &stream_phase_conditions(StreamPhase::Failed, REASON_JOB_START_FAILED, &message),
                )
                .await?;
                Err(e)
            }
        }
    }

    /// Resolves the StreamClass and job template, then builds the job
    async fn prepare_job(&self, definition: &DynamicStream, is_backfilling: bool) -> Result<Job> {
        let kind = definition.stream_kind();
        let class = self.classes.get(&kind).await.ok_or_else(|| {
            OperatorError::MissingReference(format!(
                "No StreamClass configuration found for kind {}",
                kind
            ))
        })?;

        let template_ref = definition.job_template_ref(is_backfilling).ok_or_else(|| {
            let field = if is_backfilling {
                BACKFILL_JOB_TEMPLATE_REF_FIELD
            } else {
                JOB_TEMPLATE_REF_FIELD
            };
            OperatorError::MissingReference(format!("Stream spec has no {} reference", field))
        })?;

        let template_namespace = template_ref
            .namespace
            .clone()
            .unwrap_or_else(|| definition.stream_namespace());
        let template: StreamingJobTemplate = match self
            .resources
            .get_custom_resource(
                &StreamingJobTemplate::api_coordinates(),
                &template_namespace,
                &template_ref.name,
            )
            .await?
        {
            Some(object) => parse_dynamic(object)?,
            None => {
                return Err(OperatorError::MissingReference(format!(
                    "Job template {}/{} not found",
                    template_namespace, template_ref.name
                )))
            }
        };

        build_job(
            &template,
            definition,
            definition.coordinates(),
            is_backfilling,
            &class.spec.secret_ref_fields,
        )
    }

    async fn stop_job(&self, namespace: &str, name: &str) -> Result<()> {
        match self.jobs.delete_job(namespace, name).await {
            Ok(()) => {
                info!(job = %name, namespace = %namespace, "Stopped streaming job");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(job = %name, namespace = %namespace, "Job already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Sets or removes an annotation. With `expected`, the write only happens
    /// while the annotation still holds that value.
    async fn annotate(
        &self,
        target: &AnnotationTarget,
        key: &str,
        value: Option<&str>,
        expected: Option<&str>,
    ) -> Result<()> {
        let current = match target {
            AnnotationTarget::StreamDefinition(stream) => self
                .resources
                .get_custom_resource(&stream.coordinates, &stream.namespace, &stream.name)
                .await?
                .map(|object| object.annotations().get(key).cloned()),
            AnnotationTarget::Job { namespace, name } => self
                .jobs
                .get_job(namespace, name)
                .await?
                .map(|job| job.annotations().get(key).cloned()),
        };

        let Some(current) = current else {
            debug!(resource = %target, key, "Annotation target is gone");
            return Ok(());
        };
        if current.as_deref() == value {
            debug!(resource = %target, key, "Annotation already up to date");
            return Ok(());
        }
        if let Some(expected) = expected {
            if current.as_deref() != Some(expected) {
                debug!(
                    resource = %target,
                    key,
                    expected,
                    current = current.as_deref().unwrap_or("<none>"),
                    "Annotation changed since the decision; leaving it"
                );
                return Ok(());
            }
        }

        let result = match target {
            AnnotationTarget::StreamDefinition(stream) => {
                self.resources
                    .annotate_resource(&stream.coordinates, &stream.namespace, &stream.name, key, value)
                    .await
            }
            AnnotationTarget::Job { namespace, name } => {
                self.jobs.annotate_job(namespace, name, key, value).await
            }
        };

        match result {
            Ok(()) => {
                info!(resource = %target, key, value = value.unwrap_or("<removed>"), "Annotated resource");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(resource = %target, key, "Annotation target is gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Executes an `UpdateStatus` command
    async fn apply_status(&self, command: &Command) -> Result<()> {
        match command {
            Command::UpdateStatus {
                stream,
                phase,
                conditions,
            } => self.update_status(stream, *phase, conditions).await,
            other => Err(OperatorError::InvalidState(format!(
                "{} is not a status command",
                other.name()
            ))),
        }
    }

    async fn update_status(
        &self,
        stream: &StreamRef,
        phase: StreamPhase,
        conditions: &[ConditionFields],
    ) -> Result<()> {
        let Some(object) = self
            .resources
            .get_custom_resource(&stream.coordinates, &stream.namespace, &stream.name)
            .await?
        else {
            debug!(stream = %stream, "Stream definition is gone; skipping status update");
            return Ok(());
        };

        let current = DynamicStream::new(object, stream.coordinates.clone())
            .status()
            .unwrap_or_default();
        let existing: Vec<ConditionFields> =
            current.conditions.into_iter().map(ConditionFields::from).collect();
        let merged = merge_conditions(existing.clone(), conditions);
        if current.phase == Some(phase) && merged == existing {
            debug!(stream = %stream, phase = phase.as_str(), "Status already up to date");
            return Ok(());
        }

        let status = StreamStatus {
            phase: Some(phase),
            conditions: merged
                .into_iter()
                .map(ConditionFields::into_stream_condition)
                .collect(),
        };
        self.resources
            .patch_custom_resource_status(
                &stream.coordinates,
                &stream.namespace,
                &stream.name,
                serde_json::to_value(&status)?,
            )
            .await?;
        info!(stream = %stream, phase = phase.as_str(), "Updated stream status");
        Ok(())
    }

    async fn set_stream_class_status(
        &self,
        class: &StreamClassRef,
        phase: StreamClassPhase,
        conditions: &[ConditionFields],
    ) -> Result<()> {
        let coordinates = StreamClass::api_coordinates();
        let Some(object) = self
            .resources
            .get_custom_resource(&coordinates, &class.namespace, &class.name)
            .await?
        else {
            debug!(stream_class = %class.name, "StreamClass is gone; skipping status update");
            return Ok(());
        };

        let current: StreamClassStatus = object
            .data
            .get("status")
            .cloned()
            .and_then(|status| serde_json::from_value(status).ok())
            .unwrap_or_default();
        let existing: Vec<ConditionFields> =
            current.conditions.into_iter().map(ConditionFields::from).collect();
        let merged = merge_conditions(existing.clone(), conditions);
        if current.phase == Some(phase) && merged == existing {
            debug!(stream_class = %class.name, "StreamClass status already up to date");
            return Ok(());
        }

        let status = StreamClassStatus {
            phase: Some(phase),
            conditions: merged
                .into_iter()
                .map(ConditionFields::into_stream_class_condition)
                .collect(),
        };
        self.resources
            .patch_custom_resource_status(
                &coordinates,
                &class.namespace,
                &class.name,
                serde_json::to_value(&status)?,
            )
            .await?;
        info!(stream_class = %class.name, namespace = %class.namespace, phase = ?phase, "Updated StreamClass status");
        Ok(())
    }
}
