//! Resource accessors
//!
//! Typed get/list/watch/patch operations against custom resources and batch
//! jobs. The reconcilers and command handlers only talk to the cluster
//! through these traits.

pub mod cluster;
#[cfg(test)]
pub mod memory;

pub use cluster::KubeAccessor;

use crate::crd::ApiCoordinates;
use crate::error::Result;
use crate::events::EventStream;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::api::DynamicObject;

/// Operations on custom resources of any registered kind
#[async_trait]
pub trait StreamResourceApi: Send + Sync {
    /// Lists, then watches resources, buffering at most `buffer_capacity` events.
    ///
    /// The initial list arrives as `Added` events that wait for buffer space; live
    /// events overflow the subscription once the buffer is full. `namespace`
    /// of `None` watches all namespaces.
    async fn watch_custom_resource(
        &self,
        coordinates: &ApiCoordinates,
        namespace: Option<&str>,
        buffer_capacity: usize,
    ) -> Result<EventStream<DynamicObject>>;

    /// `Ok(None)` when the resource does not exist
    async fn get_custom_resource(
        &self,
        coordinates: &ApiCoordinates,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    async fn patch_custom_resource_status(
        &self,
        coordinates: &ApiCoordinates,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()>;

    /// Sets an annotation, or removes it when `value` is `None`
    async fn annotate_resource(
        &self,
        coordinates: &ApiCoordinates,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()>;
}

/// Operations on batch jobs
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Lists, then watches operator-managed jobs
    async fn watch_jobs(
        &self,
        namespace: Option<&str>,
        buffer_capacity: usize,
    ) -> Result<EventStream<Job>>;

    /// `Ok(None)` when the job does not exist
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;

    async fn send_job(&self, job: &Job, namespace: &str) -> Result<()>;

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;

    /// Sets an annotation, or removes it when `value` is `None`
    async fn annotate_job(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()>;
}
