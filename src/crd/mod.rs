//! Custom Resource Definitions for the Arcane stream operator
//!
//! - StreamClass: registers a stream kind and its per-kind settings
//! - StreamingJobTemplate: job template referenced by stream definitions
//! - Stream definitions: dynamic documents of any registered kind, with
//!   SqlServerStream as a typed example kind

mod coordinates;
mod job_template;
mod sql_server_stream;
mod stream_class;
pub(crate) mod stream_definition;

pub use coordinates::ApiCoordinates;
pub use job_template::{JobTemplateRef, StreamingJobTemplate, StreamingJobTemplateSpec};
pub use sql_server_stream::{SecretRef, SqlServerStream, SqlServerStreamSpec};
pub use stream_class::{
    StreamClass, StreamClassCondition, StreamClassPhase, StreamClassSpec, StreamClassStatus,
};
pub use stream_definition::{
    configuration_checksum, DynamicStream, StreamCondition, StreamDefinition, StreamEnvironment,
    StreamPhase, StreamRef, StreamStatus,
};

use crate::error::Result;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::DynamicObject;
use kube::CustomResourceExt;
use serde::de::DeserializeOwned;

/// Definitions of the statically known custom resources
pub fn crds() -> Vec<CustomResourceDefinition> {
    vec![
        StreamClass::crd(),
        StreamingJobTemplate::crd(),
        SqlServerStream::crd(),
    ]
}

/// Converts a dynamic object into a typed resource
pub fn parse_dynamic<K: DeserializeOwned>(object: DynamicObject) -> Result<K> {
    let value = serde_json::to_value(object)?;
    Ok(serde_json::from_value(value)?)
}
