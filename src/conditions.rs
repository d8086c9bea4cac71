//! Kubernetes-standard status condition helpers
//!
//! Provides constants and builder functions for the status conditions the
//! operator writes to stream definitions and stream classes.

use crate::crd::{StreamClassCondition, StreamCondition, StreamPhase};
use chrono::Utc;

// Condition status values
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";
pub const CONDITION_UNKNOWN: &str = "Unknown";

// Condition types
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_ERROR: &str = "Error";

// Reasons
pub const REASON_RUNNING: &str = "Running";
pub const REASON_RELOADING: &str = "Reloading";
pub const REASON_SUSPENDED: &str = "Suspended";
pub const REASON_CRASH_LOOP: &str = "CrashLoopDetected";
pub const REASON_INTERNAL_ERROR: &str = "InternalError";
pub const REASON_JOB_START_FAILED: &str = "JobStartFailed";
pub const REASON_ATTACHED: &str = "PipelineAttached";
pub const REASON_PIPELINE_FAILED: &str = "PipelineFailed";
pub const REASON_STOPPED: &str = "OperatorStopped";

/// Build a condition with the current timestamp.
pub fn build_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> ConditionFields {
    ConditionFields {
        last_transition_time: Some(Utc::now().to_rfc3339()),
        ..pending_condition(condition_type, status, reason, message)
    }
}

/// Build a condition without a timestamp.
///
/// Commands carry pending conditions so that deciding the same command twice
/// yields equal values; the timestamp is filled in when the status is written.
pub fn pending_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> ConditionFields {
    ConditionFields {
        condition_type: condition_type.to_string(),
        status: status.to_string(),
        last_transition_time: None,
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
    }
}

/// Conditions describing a stream in the given phase
pub fn stream_phase_conditions(phase: StreamPhase, reason: &str, message: &str) -> Vec<ConditionFields> {
    match phase {
        StreamPhase::Running => vec![
            pending_condition(CONDITION_READY, CONDITION_TRUE, reason, message),
            pending_condition(CONDITION_ERROR, CONDITION_FALSE, reason, message),
        ],
        StreamPhase::Reloading | StreamPhase::Suspended => vec![
            pending_condition(CONDITION_READY, CONDITION_FALSE, reason, message),
            pending_condition(CONDITION_ERROR, CONDITION_FALSE, reason, message),
        ],
        StreamPhase::Failed => vec![
            pending_condition(CONDITION_READY, CONDITION_FALSE, reason, message),
            pending_condition(CONDITION_ERROR, CONDITION_TRUE, reason, message),
        ],
    }
}

/// Generic condition fields that can be converted into any CRD-specific condition type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionFields {
    pub condition_type: String,
    pub status: String,
    pub last_transition_time: Option<String>,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl ConditionFields {
    pub fn into_stream_condition(self) -> StreamCondition {
        StreamCondition {
            r#type: self.condition_type,
            status: self.status,
            last_transition_time: self.last_transition_time,
            reason: self.reason,
            message: self.message,
        }
    }

    pub fn into_stream_class_condition(self) -> StreamClassCondition {
        StreamClassCondition {
            r#type: self.condition_type,
            status: self.status,
            last_transition_time: self.last_transition_time,
            reason: self.reason,
            message: self.message,
        }
    }
}

impl From<StreamCondition> for ConditionFields {
    fn from(c: StreamCondition) -> Self {
        Self {
            condition_type: c.r#type,
            status: c.status,
            last_transition_time: c.last_transition_time,
            reason: c.reason,
            message: c.message,
        }
    }
}

impl From<StreamClassCondition> for ConditionFields {
    fn from(c: StreamClassCondition) -> Self {
        Self {
            condition_type: c.r#type,
            status: c.status,
            last_transition_time: c.last_transition_time,
            reason: c.reason,
            message: c.message,
        }
    }
}

/// Set or update a condition in a list, preserving lastTransitionTime when status hasn't changed.
pub fn set_condition(conditions: &mut Vec<ConditionFields>, new: ConditionFields) {
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.condition_type == new.condition_type)
    {
        if existing.status != new.status {
            *existing = new;
        } else {
            existing.reason = new.reason;
            existing.message = new.message;
        }
    } else {
        conditions.push(new);
    }
}

/// Merge pending conditions into the conditions currently on a resource.
///
/// Pending conditions get the current time as their transition time unless
/// the existing condition of the same type keeps its status.
pub fn merge_conditions(
    existing: Vec<ConditionFields>,
    pending: &[ConditionFields],
) -> Vec<ConditionFields> {
    let mut merged = existing;
    let now = Utc::now().to_rfc3339();
    for condition in pending {
        let mut stamped = condition.clone();
        if stamped.last_transition_time.is_none() {
            stamped.last_transition_time = Some(now.clone());
        }
        set_condition(&mut merged, stamped);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_condition() {
        let cond = build_condition(CONDITION_READY, CONDITION_TRUE, "Running", "Stream is running");
        assert_eq!(cond.condition_type, "Ready");
        assert_eq!(cond.status, "True");
        assert!(cond.last_transition_time.is_some());
        assert_eq!(cond.reason.as_deref(), Some("Running"));
        assert_eq!(cond.message.as_deref(), Some("Stream is running"));
    }

    #[test]
    fn test_pending_conditions_are_comparable() {
        let a = stream_phase_conditions(StreamPhase::Failed, REASON_CRASH_LOOP, "crash");
        let b = stream_phase_conditions(StreamPhase::Failed, REASON_CRASH_LOOP, "crash");
        assert_eq!(a, b);
        assert!(a.iter().all(|c| c.last_transition_time.is_none()));
        assert_eq!(a[1].condition_type, CONDITION_ERROR);
        assert_eq!(a[1].status, CONDITION_TRUE);
    }

    #[test]
    fn test_set_condition_adds_new() {
        let mut conditions = Vec::new();
        let cond = build_condition("Ready", CONDITION_TRUE, "OK", "ok");
        set_condition(&mut conditions, cond);
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_merge_preserves_transition_time_on_same_status() {
        let existing = vec![ConditionFields {
            condition_type: "Ready".to_string(),
            status: CONDITION_TRUE.to_string(),
            last_transition_time: Some("2024-01-01T00:00:00Z".to_string()),
            reason: Some("First".to_string()),
            message: Some("first".to_string()),
        }];

        let merged = merge_conditions(
            existing,
            &[pending_condition("Ready", CONDITION_TRUE, "Second", "second")],
        );

        assert_eq!(merged.len(), 1);
        assert_eq!(
            merged[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert_eq!(merged[0].reason.as_deref(), Some("Second"));
    }

    #[test]
    fn test_merge_stamps_transition_time_on_status_change() {
        let existing = vec![ConditionFields {
            condition_type: "Ready".to_string(),
            status: CONDITION_FALSE.to_string(),
            last_transition_time: Some("2024-01-01T00:00:00Z".to_string()),
            reason: Some("Suspended".to_string()),
            message: Some("suspended".to_string()),
        }];

        let merged = merge_conditions(
            existing,
            &stream_phase_conditions(StreamPhase::Running, REASON_RUNNING, "running"),
        );

        assert_eq!(merged.len(), 2);
        assert_ne!(
            merged[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert!(merged[1].last_transition_time.is_some());
    }

    #[test]
    fn test_condition_conversions() {
        let cond = build_condition("Ready", CONDITION_TRUE, "OK", "ok");
        let sc = cond.clone().into_stream_condition();
        assert_eq!(sc.r#type, "Ready");
        assert_eq!(ConditionFields::from(sc), cond);

        let cc = cond.into_stream_class_condition();
        assert_eq!(cc.status, "True");
    }
}
