//! Stream Reconciler
//!
//! Consumes stream definition events of one kind, looks up the job currently
//! running the stream and derives the commands that bring the cluster in line
//! with the definition. The decision functions are pure; the reconciler only
//! wires them to the watch and the command handler.

use crate::commands::Command;
use crate::controllers::{drive_events, Pipeline, PipelineContext};
use crate::crd::{ApiCoordinates, DynamicStream, StreamClass, StreamDefinition, StreamPhase};
use crate::dedup::EventDeduplicator;
use crate::error::Result;
use crate::events::{EventType, ResourceEvent};
use crate::jobs::StreamingJob;
use kube::api::DynamicObject;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Commands for a definition that was just added (or relisted)
pub fn decide_added(definition: &DynamicStream, job: Option<&StreamingJob>) -> Vec<Command> {
    let stream = definition.reference();
    match job {
        None if definition.is_suspended() => {
            vec![Command::update_status(stream, StreamPhase::Suspended)]
        }
        None => vec![Command::start_job(definition, true)],
        Some(job) if job.is_backfilling() => {
            vec![Command::update_status(stream, StreamPhase::Reloading)]
        }
        Some(job) if definition.is_suspended() => vec![Command::stop_job(job)],
        Some(_) => vec![Command::update_status(stream, StreamPhase::Running)],
    }
}

/// Commands for a modified definition; the first matching rule wins
pub fn decide_modified(definition: &DynamicStream, job: Option<&StreamingJob>) -> Vec<Command> {
    match job {
        None if definition.is_crash_loop() => vec![Command::set_crash_loop_status(definition)],
        Some(job) if definition.is_suspended() => vec![Command::stop_job(job)],
        None if definition.is_suspended() => vec![Command::update_status(
            definition.reference(),
            StreamPhase::Suspended,
        )],
        None if definition.is_reload_requested() => vec![
            Command::remove_reload_requested_annotation(definition),
            Command::start_job(definition, true),
        ],
        Some(job) if definition.is_reload_requested() => vec![
            Command::remove_reload_requested_annotation(definition),
            Command::request_job_reload(job),
        ],
        Some(job) => {
            let checksum = definition.configuration_checksum();
            if job.configuration_checksum() != Some(checksum.as_str()) {
                // Drift: the job reconciler stops it once the annotation lands
                vec![Command::request_job_restart(job)]
            } else {
                Vec::new()
            }
        }
        None => vec![Command::start_job(definition, false)],
    }
}

/// Commands for any definition event.
///
/// Deletions produce nothing: jobs of deleted streams are cleaned up through
/// the job watch.
pub fn decide(
    event_type: EventType,
    definition: &DynamicStream,
    job: Option<&StreamingJob>,
) -> Vec<Command> {
    match event_type {
        EventType::Added => decide_added(definition, job),
        EventType::Modified => decide_modified(definition, job),
        EventType::Deleted => Vec::new(),
    }
}

/// Reconciler for the stream definitions of one kind
pub struct StreamReconciler {
    coordinates: ApiCoordinates,
    buffer_capacity: usize,
    context: PipelineContext,
    dedup: EventDeduplicator,
}

impl StreamReconciler {
    pub fn new(class: &StreamClass, context: PipelineContext) -> Self {
        Self {
            coordinates: class.target_coordinates(),
            buffer_capacity: class.buffer_capacity(),
            dedup: EventDeduplicator::new(context.dedup_capacity),
            context,
        }
    }

    /// Processes one watch event
    async fn process(&self, event: ResourceEvent<DynamicObject>) -> Result<()> {
        let Some(event) = self.dedup.filter(&self.coordinates.kind, event) else {
            return Ok(());
        };
        let definition = DynamicStream::new(event.resource, self.coordinates.clone());
        if event.event_type == EventType::Deleted {
            debug!(stream = %definition.reference(), "Stream definition deleted");
            return Ok(());
        }

        let job = self
            .context
            .jobs
            .get_job(&definition.stream_namespace(), &definition.stream_id())
            .await?
            .map(StreamingJob::new);

        let commands = decide(event.event_type, &definition, job.as_ref());
        if !commands.is_empty() {
            info!(
                stream = %definition.reference(),
                event = ?event.event_type,
                commands = ?commands.iter().map(Command::name).collect::<Vec<_>>(),
                "Reconciling stream definition"
            );
        }
        self.context.handler.handle_all(&commands).await
    }
}

#[async_trait::async_trait]
impl Pipeline for StreamReconciler {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let events = self
            .context
            .resources
            .watch_custom_resource(
                &self.coordinates,
                self.context.namespace.as_deref(),
                self.buffer_capacity,
            )
            .await?;

        info!(kind = %self.coordinates.kind, resource = %self.coordinates, "Starting stream pipeline");
        drive_events(&self.name(), events, &cancel, |event| self.process(event)).await
    }

    fn name(&self) -> String {
        format!("stream-reconciler/{}", self.coordinates.kind)
    }
}
