//! Commands
//!
//! Every cluster mutation the reconcilers can request is one of these
//! variants. Commands are plain data: deciding on a command has no side
//! effect, the command handler performs it.

use crate::annotations::{StreamState, STATE_ANNOTATION};
use crate::conditions::{
    pending_condition, stream_phase_conditions, ConditionFields, CONDITION_FALSE, CONDITION_READY,
    CONDITION_TRUE, REASON_CRASH_LOOP, REASON_INTERNAL_ERROR, REASON_RELOADING, REASON_RUNNING,
    REASON_SUSPENDED,
};
use crate::crd::{DynamicStream, StreamClassPhase, StreamPhase, StreamRef};
use crate::jobs::StreamingJob;
use std::fmt;

/// Resource an annotation command applies to
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationTarget {
    StreamDefinition(StreamRef),
    Job { namespace: String, name: String },
}

impl fmt::Display for AnnotationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationTarget::StreamDefinition(stream) => write!(f, "{}", stream),
            AnnotationTarget::Job { namespace, name } => write!(f, "Job/{}/{}", namespace, name),
        }
    }
}

/// Identity of a StreamClass for status updates
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamClassRef {
    pub namespace: String,
    pub name: String,
}

/// A cluster mutation requested by a reconciler
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a job for the stream from its normal or backfill template
    StartJob {
        definition: DynamicStream,
        is_backfilling: bool,
    },
    /// Delete a job
    StopJob { name: String, namespace: String },
    /// Set an annotation on a stream definition or job
    SetAnnotation {
        target: AnnotationTarget,
        key: String,
        value: String,
    },
    /// Remove an annotation from a stream definition or job; when `expected`
    /// is set, only that value is removed
    RemoveAnnotation {
        target: AnnotationTarget,
        key: String,
        expected: Option<String>,
    },
    /// Rewrite the status of a stream definition
    UpdateStatus {
        stream: StreamRef,
        phase: StreamPhase,
        conditions: Vec<ConditionFields>,
    },
    /// Rewrite the status of a StreamClass
    SetStreamClassStatus {
        class: StreamClassRef,
        phase: StreamClassPhase,
        conditions: Vec<ConditionFields>,
    },
}

impl Command {
    pub fn start_job(definition: &DynamicStream, is_backfilling: bool) -> Self {
        Command::StartJob {
            definition: definition.clone(),
            is_backfilling,
        }
    }

    pub fn stop_job(job: &StreamingJob) -> Self {
        Command::StopJob {
            name: job.name(),
            namespace: job.namespace(),
        }
    }

    /// Status for a healthy phase with the standard reason and message
    pub fn update_status(stream: StreamRef, phase: StreamPhase) -> Self {
        let (reason, message) = match phase {
            StreamPhase::Running => (REASON_RUNNING, "Stream job is running"),
            StreamPhase::Reloading => (REASON_RELOADING, "Stream is reloading from a backfill job"),
            StreamPhase::Suspended => (REASON_SUSPENDED, "Stream is suspended"),
            StreamPhase::Failed => (REASON_INTERNAL_ERROR, "Stream failed"),
        };
        Self::status_with_reason(stream, phase, reason, message)
    }

    pub fn status_with_reason(
        stream: StreamRef,
        phase: StreamPhase,
        reason: &str,
        message: &str,
    ) -> Self {
        Command::UpdateStatus {
            stream,
            phase,
            conditions: stream_phase_conditions(phase, reason, message),
        }
    }

    pub fn set_crash_loop_status(definition: &DynamicStream) -> Self {
        Self::status_with_reason(
            definition.reference(),
            StreamPhase::Failed,
            REASON_CRASH_LOOP,
            "Stream job failed; remove the crash-loop annotation to restart",
        )
    }

    pub fn set_internal_error_status(stream: StreamRef, message: &str) -> Self {
        Self::status_with_reason(stream, StreamPhase::Failed, REASON_INTERNAL_ERROR, message)
    }

    pub fn set_crash_loop_annotation(definition: &DynamicStream) -> Self {
        Command::SetAnnotation {
            target: AnnotationTarget::StreamDefinition(definition.reference()),
            key: STATE_ANNOTATION.to_string(),
            value: StreamState::CrashLoop.to_string(),
        }
    }

    pub fn remove_reload_requested_annotation(definition: &DynamicStream) -> Self {
        Command::RemoveAnnotation {
            target: AnnotationTarget::StreamDefinition(definition.reference()),
            key: STATE_ANNOTATION.to_string(),
            expected: Some(StreamState::ReloadRequested.to_string()),
        }
    }

    pub fn request_job_reload(job: &StreamingJob) -> Self {
        Self::annotate_job_state(job, StreamState::ReloadRequested)
    }

    pub fn request_job_restart(job: &StreamingJob) -> Self {
        Self::annotate_job_state(job, StreamState::RestartRequested)
    }

    fn annotate_job_state(job: &StreamingJob, state: StreamState) -> Self {
        Command::SetAnnotation {
            target: AnnotationTarget::Job {
                namespace: job.namespace(),
                name: job.name(),
            },
            key: STATE_ANNOTATION.to_string(),
            value: state.to_string(),
        }
    }

    pub fn set_stream_class_status(
        class: StreamClassRef,
        phase: StreamClassPhase,
        reason: &str,
        message: &str,
    ) -> Self {
        let status = if phase == StreamClassPhase::Ready {
            CONDITION_TRUE
        } else {
            CONDITION_FALSE
        };
        Command::SetStreamClassStatus {
            class,
            phase,
            conditions: vec![pending_condition(CONDITION_READY, status, reason, message)],
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartJob { .. } => "StartJob",
            Command::StopJob { .. } => "StopJob",
            Command::SetAnnotation { .. } => "SetAnnotation",
            Command::RemoveAnnotation { .. } => "RemoveAnnotation",
            Command::UpdateStatus { .. } => "UpdateStatus",
            Command::SetStreamClassStatus { .. } => "SetStreamClassStatus",
        }
    }

    pub fn is_start_job(&self) -> bool {
        matches!(self, Command::StartJob { .. })
    }

    pub fn is_stop_job(&self) -> bool {
        matches!(self, Command::StopJob { .. })
    }
}
