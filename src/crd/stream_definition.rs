//! Stream definitions
//!
//! Stream kinds are registered at runtime through StreamClass resources, so
//! the operator cannot know their schema at compile time. A definition is
//! handled as a generic document ([`DynamicStream`]) behind a small
//! capability trait ([`StreamDefinition`]). Typed kinds such as
//! [`crate::crd::SqlServerStream`] implement the same trait.

use crate::annotations::{read_state, StreamState};
use crate::crd::{ApiCoordinates, JobTemplateRef};
use k8s_openapi::api::core::v1::{EnvFromSource, EnvVar};
use kube::api::DynamicObject;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::warn;

/// Spec field holding the normal-load job template reference
pub const JOB_TEMPLATE_REF_FIELD: &str = "jobTemplateRef";

/// Spec field holding the backfill job template reference
pub const BACKFILL_JOB_TEMPLATE_REF_FIELD: &str = "backfillJobTemplateRef";

/// Prefix of every environment variable injected into stream jobs
pub const ENV_PREFIX: &str = "STREAMCONTEXT__";

/// Capabilities the reconcilers need from a stream definition
pub trait StreamDefinition {
    /// Stream id; also the name of the job running the stream
    fn stream_id(&self) -> String;

    fn stream_namespace(&self) -> String;

    fn stream_kind(&self) -> String;

    fn annotations_map(&self) -> BTreeMap<String, String>;

    /// Kind-specific spec payload
    fn spec_payload(&self) -> Value;

    fn state(&self) -> Option<StreamState> {
        read_state(&self.annotations_map())
    }

    fn is_suspended(&self) -> bool {
        self.state() == Some(StreamState::Suspended)
    }

    fn is_reload_requested(&self) -> bool {
        self.state() == Some(StreamState::ReloadRequested)
    }

    fn is_crash_loop(&self) -> bool {
        self.state() == Some(StreamState::CrashLoop)
    }

    /// Template to start the job from: the backfill template for reloads
    fn job_template_ref(&self, is_backfilling: bool) -> Option<JobTemplateRef> {
        let field = if is_backfilling {
            BACKFILL_JOB_TEMPLATE_REF_FIELD
        } else {
            JOB_TEMPLATE_REF_FIELD
        };
        let value = self.spec_payload().get(field)?.clone();
        match serde_json::from_value(value) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(stream_id = %self.stream_id(), field, "Malformed job template reference: {}", e);
                None
            }
        }
    }

    fn configuration_checksum(&self) -> String {
        configuration_checksum(&self.spec_payload())
    }

    /// Environment handed to the stream job
    fn to_environment(&self, is_backfilling: bool, secret_fields: &[String]) -> StreamEnvironment {
        let mut spec = self.spec_payload();
        let mut env_from = Vec::new();

        if let Value::Object(fields) = &mut spec {
            for field in secret_fields {
                if let Some(value) = fields.remove(field) {
                    match secret_name(&value) {
                        Some(name) => env_from.push(secret_env_source(&name)),
                        None => warn!(
                            stream_id = %self.stream_id(),
                            field = %field,
                            "Secret field does not reference a secret name"
                        ),
                    }
                }
            }
        }

        let env = vec![
            env_var("STREAM_ID", self.stream_id()),
            env_var("STREAM_KIND", self.stream_kind()),
            env_var("BACKFILL", is_backfilling.to_string()),
            env_var("SPEC", canonicalize(&spec).to_string()),
        ];

        StreamEnvironment { env, env_from }
    }
}

/// Environment variables and secret sources for a stream job container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamEnvironment {
    pub env: Vec<EnvVar>,
    pub env_from: Vec<EnvFromSource>,
}

/// SHA-256 of the canonical JSON form of a spec payload, hex encoded.
///
/// Object keys are sorted before hashing, so the checksum depends only on
/// content.
pub fn configuration_checksum(payload: &Value) -> String {
    hex::encode(Sha256::digest(canonicalize(payload).to_string().as_bytes()))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&fields[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn env_var(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: format!("{}{}", ENV_PREFIX, name),
        value: Some(value),
        ..Default::default()
    }
}

/// A secret field is either a secret name or an object with a `name` field
fn secret_name(value: &Value) -> Option<String> {
    match value {
        Value::String(name) if !name.is_empty() => Some(name.clone()),
        Value::Object(fields) => fields
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn secret_env_source(name: &str) -> EnvFromSource {
    EnvFromSource {
        secret_ref: serde_json::from_value(serde_json::json!({ "name": name })).ok(),
        ..Default::default()
    }
}

/// Identity of a stream definition as needed to patch it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamRef {
    pub coordinates: ApiCoordinates,
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for StreamRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.coordinates.kind, self.namespace, self.name)
    }
}

/// A stream definition of any registered kind
#[derive(Debug, Clone)]
pub struct DynamicStream {
    object: DynamicObject,
    coordinates: ApiCoordinates,
}

impl DynamicStream {
    pub fn new(object: DynamicObject, coordinates: ApiCoordinates) -> Self {
        Self {
            object,
            coordinates,
        }
    }

    pub fn object(&self) -> &DynamicObject {
        &self.object
    }

    pub fn coordinates(&self) -> &ApiCoordinates {
        &self.coordinates
    }

    pub fn reference(&self) -> StreamRef {
        StreamRef {
            coordinates: self.coordinates.clone(),
            namespace: self.stream_namespace(),
            name: self.object.name_any(),
        }
    }

    pub fn status(&self) -> Option<StreamStatus> {
        let status = self.object.data.get("status")?.clone();
        serde_json::from_value(status).ok()
    }
}

impl PartialEq for DynamicStream {
    fn eq(&self, other: &Self) -> bool {
        self.coordinates == other.coordinates
            && self.object.metadata == other.object.metadata
            && self.object.data == other.object.data
    }
}

impl StreamDefinition for DynamicStream {
    fn stream_id(&self) -> String {
        self.object.name_any()
    }

    fn stream_namespace(&self) -> String {
        self.object
            .namespace()
            .unwrap_or_else(|| "default".to_string())
    }

    fn stream_kind(&self) -> String {
        self.coordinates.kind.clone()
    }

    fn annotations_map(&self) -> BTreeMap<String, String> {
        self.object.annotations().clone()
    }

    fn spec_payload(&self) -> Value {
        self.object.data.get("spec").cloned().unwrap_or(Value::Null)
    }
}

/// Status sub-resource written to stream definitions
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    /// Current phase of the stream
    #[serde(default)]
    pub phase: Option<StreamPhase>,

    /// Conditions representing the stream state
    #[serde(default)]
    pub conditions: Vec<StreamCondition>,
}

/// Phase of a stream
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamPhase {
    /// The streaming job is running
    Running,
    /// A backfill job is running
    Reloading,
    /// The stream is suspended and no job runs
    Suspended,
    /// The stream failed and needs intervention
    Failed,
}

impl StreamPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamPhase::Running => "RUNNING",
            StreamPhase::Reloading => "RELOADING",
            StreamPhase::Suspended => "SUSPENDED",
            StreamPhase::Failed => "FAILED",
        }
    }
}

/// Condition of a stream
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamCondition {
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
