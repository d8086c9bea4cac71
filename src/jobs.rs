//! Streaming jobs
//!
//! A streaming job is a batch Job named after its stream id. Labels carry the
//! stream id, kind and backfill flag; annotations carry the configuration
//! checksum and the API coordinates of the owning stream definition.

use crate::annotations::{
    read_state, StreamState, API_GROUP_ANNOTATION, API_PLURAL_ANNOTATION, API_VERSION_ANNOTATION,
    BACKFILLING_LABEL, CONFIGURATION_CHECKSUM_ANNOTATION, STREAM_ID_LABEL, STREAM_KIND_LABEL,
};
use crate::conditions::CONDITION_TRUE;
use crate::crd::{ApiCoordinates, StreamDefinition, StreamRef, StreamingJobTemplate};
use crate::error::{OperatorError, Result};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

const JOB_CONDITION_FAILED: &str = "Failed";
const JOB_CONDITION_COMPLETE: &str = "Complete";

/// A batch job running a stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingJob {
    job: Job,
}

impl StreamingJob {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn into_job(self) -> Job {
        self.job
    }

    pub fn name(&self) -> String {
        self.job.name_any()
    }

    pub fn namespace(&self) -> String {
        self.job.namespace().unwrap_or_else(|| "default".to_string())
    }

    /// Stream id from the label, falling back to the job name
    pub fn stream_id(&self) -> String {
        self.job
            .labels()
            .get(STREAM_ID_LABEL)
            .cloned()
            .unwrap_or_else(|| self.name())
    }

    pub fn stream_kind(&self) -> Option<&str> {
        self.job.labels().get(STREAM_KIND_LABEL).map(String::as_str)
    }

    pub fn is_backfilling(&self) -> bool {
        self.job
            .labels()
            .get(BACKFILLING_LABEL)
            .is_some_and(|v| v == "true")
    }

    pub fn configuration_checksum(&self) -> Option<&str> {
        self.job
            .annotations()
            .get(CONFIGURATION_CHECKSUM_ANNOTATION)
            .map(String::as_str)
    }

    pub fn state(&self) -> Option<StreamState> {
        read_state(self.job.annotations())
    }

    /// Job carries a terminating state or is already being deleted
    pub fn is_terminating(&self) -> bool {
        self.job.metadata.deletion_timestamp.is_some()
            || self.state().is_some_and(|s| s.is_terminating())
    }

    pub fn is_reload_requested(&self) -> bool {
        self.state() == Some(StreamState::ReloadRequested)
    }

    pub fn is_restart_requested(&self) -> bool {
        self.state() == Some(StreamState::RestartRequested)
    }

    pub fn is_schema_mismatch(&self) -> bool {
        self.state() == Some(StreamState::SchemaMismatch)
    }

    pub fn is_failed(&self) -> bool {
        self.has_condition(JOB_CONDITION_FAILED)
    }

    pub fn is_completed(&self) -> bool {
        self.has_condition(JOB_CONDITION_COMPLETE)
    }

    /// The owning stream definition, from the coordinates recorded on the job
    pub fn owner(&self) -> Option<StreamRef> {
        let annotations = self.job.annotations();
        let group = annotations.get(API_GROUP_ANNOTATION)?;
        let version = annotations.get(API_VERSION_ANNOTATION)?;
        let plural = annotations.get(API_PLURAL_ANNOTATION)?;
        let kind = self.stream_kind()?;
        Some(StreamRef {
            coordinates: ApiCoordinates::new(group.clone(), version.clone(), plural.clone(), kind),
            namespace: self.namespace(),
            name: self.stream_id(),
        })
    }

    fn has_condition(&self, condition_type: &str) -> bool {
        self.job
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == condition_type && c.status == CONDITION_TRUE)
            })
    }
}

/// Label selector matching every job the operator manages
pub fn managed_jobs_selector() -> String {
    STREAM_ID_LABEL.to_string()
}

/// Builds the job for a stream definition from a job template
pub fn build_job<D: StreamDefinition>(
    template: &StreamingJobTemplate,
    definition: &D,
    coordinates: &ApiCoordinates,
    is_backfilling: bool,
    secret_fields: &[String],
) -> Result<Job> {
    let template_spec = &template.spec.template;
    let mut spec = template_spec.spec.clone().ok_or_else(|| {
        OperatorError::Configuration(format!(
            "Job template {} has no job spec",
            template.name_any()
        ))
    })?;

    let environment = definition.to_environment(is_backfilling, secret_fields);
    if let Some(pod_spec) = spec.template.spec.as_mut() {
        for container in pod_spec
            .containers
            .iter_mut()
            .chain(pod_spec.init_containers.iter_mut().flatten())
        {
            container
                .env
                .get_or_insert_with(Vec::new)
                .extend(environment.env.iter().cloned());
            container
                .env_from
                .get_or_insert_with(Vec::new)
                .extend(environment.env_from.iter().cloned());
        }
    }

    let template_meta = template_spec.metadata.clone().unwrap_or_default();

    let mut labels: BTreeMap<String, String> = template_meta.labels.unwrap_or_default();
    labels.insert(STREAM_ID_LABEL.to_string(), definition.stream_id());
    labels.insert(STREAM_KIND_LABEL.to_string(), definition.stream_kind());
    labels.insert(BACKFILLING_LABEL.to_string(), is_backfilling.to_string());

    let mut annotations: BTreeMap<String, String> = template_meta.annotations.unwrap_or_default();
    annotations.insert(
        CONFIGURATION_CHECKSUM_ANNOTATION.to_string(),
        definition.configuration_checksum(),
    );
    annotations.insert(API_GROUP_ANNOTATION.to_string(), coordinates.group.clone());
    annotations.insert(API_VERSION_ANNOTATION.to_string(), coordinates.version.clone());
    annotations.insert(API_PLURAL_ANNOTATION.to_string(), coordinates.plural.clone());

    // Pod labels let the job's pods be traced back to the stream as well
    if let Some(pod_meta) = spec.template.metadata.as_mut() {
        let pod_labels = pod_meta.labels.get_or_insert_with(BTreeMap::new);
        pod_labels.insert(STREAM_ID_LABEL.to_string(), definition.stream_id());
        pod_labels.insert(STREAM_KIND_LABEL.to_string(), definition.stream_kind());
    }

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(definition.stream_id()),
            namespace: Some(definition.stream_namespace()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    })
}
