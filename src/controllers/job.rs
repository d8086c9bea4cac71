//! Job-Event Reconciler
//!
//! Consumes events of operator-managed jobs and derives follow-up commands
//! against the owning stream definitions: crash-loop detection, restarts and
//! reloads. A job asked to restart or reload is only stopped here; the
//! replacement job is started once its Deleted event arrives, so two jobs
//! for one stream never run side by side.

use crate::commands::Command;
use crate::controllers::{drive_events, Pipeline, PipelineContext};
use crate::crd::{DynamicStream, StreamDefinition, StreamPhase};
use crate::dedup::EventDeduplicator;
use crate::error::Result;
use crate::events::{EventType, ResourceEvent};
use crate::jobs::StreamingJob;
use k8s_openapi::api::batch::v1::Job;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Commands for a job that appeared
pub fn decide_job_added(job: &StreamingJob, definition: Option<&DynamicStream>) -> Vec<Command> {
    let Some(definition) = definition else {
        return Vec::new();
    };
    if job.is_terminating() {
        return Vec::new();
    }
    let stream = definition.reference();
    match (job.is_backfilling(), definition.is_reload_requested()) {
        (true, true) => vec![
            Command::remove_reload_requested_annotation(definition),
            Command::update_status(stream, StreamPhase::Reloading),
        ],
        (true, false) => vec![Command::update_status(stream, StreamPhase::Reloading)],
        (false, _) => vec![Command::update_status(stream, StreamPhase::Running)],
    }
}

/// Commands for a job that changed
pub fn decide_job_modified(job: &StreamingJob) -> Vec<Command> {
    if job.is_terminating() {
        return Vec::new();
    }
    if job.is_reload_requested() || job.is_restart_requested() {
        return vec![Command::stop_job(job)];
    }
    // Finished jobs are removed; the Deleted event decides what comes next
    if job.is_failed() || job.is_completed() {
        return vec![Command::stop_job(job)];
    }
    Vec::new()
}

/// Commands for a job that is gone
pub fn decide_job_deleted(job: &StreamingJob, definition: Option<&DynamicStream>) -> Vec<Command> {
    let Some(definition) = definition else {
        return Vec::new();
    };
    if job.is_failed() {
        return vec![
            Command::set_crash_loop_status(definition),
            Command::set_crash_loop_annotation(definition),
        ];
    }
    if definition.is_suspended() {
        return vec![Command::update_status(
            definition.reference(),
            StreamPhase::Suspended,
        )];
    }
    if definition.is_crash_loop() {
        return vec![Command::set_crash_loop_status(definition)];
    }
    let is_backfilling = job.is_reload_requested() || job.is_schema_mismatch();
    vec![Command::start_job(definition, is_backfilling)]
}

/// Commands for any job event
pub fn decide_job(
    event_type: EventType,
    job: &StreamingJob,
    definition: Option<&DynamicStream>,
) -> Vec<Command> {
    match event_type {
        EventType::Added => decide_job_added(job, definition),
        EventType::Modified => decide_job_modified(job),
        EventType::Deleted => decide_job_deleted(job, definition),
    }
}

/// Reconciler for job events of every stream kind
pub struct JobEventReconciler {
    context: PipelineContext,
    buffer_capacity: usize,
    dedup: EventDeduplicator,
}

impl JobEventReconciler {
    pub fn new(context: PipelineContext, buffer_capacity: usize) -> Self {
        Self {
            dedup: EventDeduplicator::new(context.dedup_capacity),
            buffer_capacity,
            context,
        }
    }

    /// Looks up the stream definition that owns the job
    async fn owner(&self, job: &StreamingJob) -> Result<Option<DynamicStream>> {
        let Some(owner) = job.owner() else {
            warn!(job = %job.name(), namespace = %job.namespace(), "Job does not record its owner");
            return Ok(None);
        };
        let object = self
            .context
            .resources
            .get_custom_resource(&owner.coordinates, &owner.namespace, &owner.name)
            .await?;
        if object.is_none() {
            debug!(job = %job.name(), owner = %owner, "Owning stream definition is gone");
        }
        Ok(object.map(|object| DynamicStream::new(object, owner.coordinates)))
    }

    async fn process(&self, event: ResourceEvent<Job>) -> Result<()> {
        let Some(event) = self.dedup.filter("Job", event) else {
            return Ok(());
        };
        let job = StreamingJob::new(event.resource);

        let definition = match event.event_type {
            EventType::Modified => None,
            EventType::Added | EventType::Deleted => self.owner(&job).await?,
        };

        let commands = decide_job(event.event_type, &job, definition.as_ref());
        if !commands.is_empty() {
            info!(
                job = %job.name(),
                namespace = %job.namespace(),
                event = ?event.event_type,
                commands = ?commands.iter().map(Command::name).collect::<Vec<_>>(),
                "Reconciling streaming job"
            );
        }
        self.context.handler.handle_all(&commands).await
    }
}

#[async_trait::async_trait]
impl Pipeline for JobEventReconciler {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let events = self
            .context
            .jobs
            .watch_jobs(self.context.namespace.as_deref(), self.buffer_capacity)
            .await?;

        info!("Starting job event pipeline");
        drive_events(&self.name(), events, &cancel, |event| self.process(event)).await
    }

    fn name(&self) -> String {
        "job-reconciler".to_string()
    }
}
