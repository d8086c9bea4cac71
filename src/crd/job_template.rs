//! StreamingJobTemplate Custom Resource Definition
//!
//! Holds the batch Job template that stream definitions reference for their
//! normal and backfill runs.

use crate::crd::ApiCoordinates;
use k8s_openapi::api::batch::v1::JobTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// StreamingJobTemplate is the Schema for the streamingjobtemplates API
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "arcane.dev",
    version = "v1",
    kind = "StreamingJobTemplate",
    namespaced,
    shortname = "sjt",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StreamingJobTemplateSpec {
    /// Template of the job to run
    pub template: JobTemplateSpec,
}

impl StreamingJobTemplate {
    pub fn api_coordinates() -> ApiCoordinates {
        ApiCoordinates::new(
            "arcane.dev",
            "v1",
            "streamingjobtemplates",
            "StreamingJobTemplate",
        )
    }
}

/// Reference from a stream definition to a StreamingJobTemplate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobTemplateRef {
    pub name: String,
    /// Defaults to the namespace of the stream definition
    #[serde(default)]
    pub namespace: Option<String>,
}
