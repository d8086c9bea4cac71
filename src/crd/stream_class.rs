//! StreamClass Custom Resource Definition
//!
//! A StreamClass registers a stream kind with the operator: the CRD
//! coordinates of its stream definitions plus per-kind settings.

use crate::crd::ApiCoordinates;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// StreamClass is the Schema for the streamclasses API
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "arcane.dev",
    version = "v1",
    kind = "StreamClass",
    namespaced,
    status = "StreamClassStatus",
    shortname = "sc",
    printcolumn = r#"{"name":"Kind","type":"string","jsonPath":".spec.kindRef"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StreamClassSpec {
    /// API group of the stream definition CRD
    pub api_group_ref: String,

    /// API version of the stream definition CRD
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Plural name of the stream definition CRD
    pub plural_name: String,

    /// Kind of the stream definition CRD
    pub kind_ref: String,

    /// Spec fields whose values reference secrets to mount into the job
    #[serde(default)]
    pub secret_ref_fields: Vec<String>,

    /// Capacity of the event buffer of this kind's pipeline
    #[serde(default = "default_max_buffer_capacity")]
    pub max_buffer_capacity: usize,
}

/// Status of the StreamClass
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamClassStatus {
    /// Current phase of the stream class
    #[serde(default)]
    pub phase: Option<StreamClassPhase>,

    /// Conditions representing the stream class state
    #[serde(default)]
    pub conditions: Vec<StreamClassCondition>,
}

/// Phase of the stream class lifecycle. `Failed` and `Stopped` mean no
/// pipeline is running for the kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamClassPhase {
    /// The kind's pipeline is attached and processing events
    Ready,
    /// The kind's pipeline terminated or could not be attached
    Failed,
    /// The operator stopped the kind's pipeline
    Stopped,
}

impl StreamClassPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamClassPhase::Failed | StreamClassPhase::Stopped)
    }
}

/// Condition of the stream class
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamClassCondition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last time the condition transitioned
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl StreamClass {
    /// Coordinates of the StreamClass CRD itself
    pub fn api_coordinates() -> ApiCoordinates {
        ApiCoordinates::new("arcane.dev", "v1", "streamclasses", "StreamClass")
    }

    /// Coordinates of the stream definition CRD this class governs
    pub fn target_coordinates(&self) -> ApiCoordinates {
        ApiCoordinates::new(
            self.spec.api_group_ref.clone(),
            self.spec.api_version.clone(),
            self.spec.plural_name.clone(),
            self.spec.kind_ref.clone(),
        )
    }

    /// Stable id of the kind: namespace plus kind reference
    pub fn stream_class_id(&self) -> String {
        format!(
            "{}-{}",
            self.namespace().unwrap_or_else(|| "default".to_string()),
            self.spec.kind_ref.to_lowercase()
        )
    }

    pub fn buffer_capacity(&self) -> usize {
        self.spec.max_buffer_capacity.max(1)
    }

    pub fn phase(&self) -> Option<StreamClassPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_max_buffer_capacity() -> usize {
    10_000
}
