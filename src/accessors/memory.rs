//! In-memory cluster used by tests
//!
//! Stores custom resources and jobs in maps, records every mutation, and
//! hands out watch subscriptions that tests feed explicitly.

use crate::accessors::{JobApi, StreamResourceApi};
use crate::crd::ApiCoordinates;
use crate::error::{OperatorError, Result};
use crate::events::{bounded_channel, EventSender, EventStream, ResourceEvent};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::api::DynamicObject;
use kube::core::ErrorResponse;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

type ObjectKey = (String, String, String);
type JobKey = (String, String);

#[derive(Default)]
struct ClusterState {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    jobs: BTreeMap<JobKey, Job>,
    resource_watchers: HashMap<String, Vec<EventSender<DynamicObject>>>,
    job_watchers: Vec<EventSender<Job>>,
    missing_plurals: HashSet<String>,
    failing_operations: HashSet<String>,
    calls: Vec<String>,
    next_version: u64,
}

impl ClusterState {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn check(&mut self, operation: &str) -> Result<()> {
        if self.failing_operations.contains(operation) {
            return Err(api_error(500, "injected failure"));
        }
        Ok(())
    }
}

pub fn api_error(code: u16, message: &str) -> OperatorError {
    OperatorError::KubeApi(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: "Test".to_string(),
        code,
    }))
}

#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_object(&self, coordinates: &ApiCoordinates, object: DynamicObject) {
        let key = (
            coordinates.plural.clone(),
            object.namespace().unwrap_or_default(),
            object.name_any(),
        );
        self.state.lock().unwrap().objects.insert(key, object);
    }

    pub fn object(&self, coordinates: &ApiCoordinates, namespace: &str, name: &str) -> Option<DynamicObject> {
        let key = (coordinates.plural.clone(), namespace.to_string(), name.to_string());
        self.state.lock().unwrap().objects.get(&key).cloned()
    }

    pub fn insert_job(&self, job: Job) {
        let key = (job.namespace().unwrap_or_default(), job.name_any());
        self.state.lock().unwrap().jobs.insert(key, job);
    }

    pub fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        let key = (namespace.to_string(), name.to_string());
        self.state.lock().unwrap().jobs.get(&key).cloned()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().unwrap().jobs.values().cloned().collect()
    }

    pub fn remove_job(&self, namespace: &str, name: &str) -> Option<Job> {
        let key = (namespace.to_string(), name.to_string());
        self.state.lock().unwrap().jobs.remove(&key)
    }

    /// Mutations performed so far, e.g. `send_job streams/orders`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Makes every call of `operation` fail with a server error
    pub fn fail_operation(&self, operation: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_operations
            .insert(operation.to_string());
    }

    /// Makes watches on `plural` fail as if the CRD did not exist
    pub fn remove_resource_type(&self, plural: &str) {
        self.state
            .lock()
            .unwrap()
            .missing_plurals
            .insert(plural.to_string());
    }

    /// Delivers an event to every live watch on `plural`
    pub fn emit(&self, plural: &str, event: ResourceEvent<DynamicObject>) -> Vec<Result<()>> {
        let mut state = self.state.lock().unwrap();
        let watchers = state.resource_watchers.entry(plural.to_string()).or_default();
        watchers.retain(|w| !w.is_closed());
        watchers.iter().map(|w| w.push(event.clone())).collect()
    }

    /// Delivers an event to every live job watch
    pub fn emit_job(&self, event: ResourceEvent<Job>) -> Vec<Result<()>> {
        let mut state = self.state.lock().unwrap();
        state.job_watchers.retain(|w| !w.is_closed());
        state.job_watchers.iter().map(|w| w.push(event.clone())).collect()
    }

    pub fn watcher_count(&self, plural: &str) -> usize {
        let mut state = self.state.lock().unwrap();
        let watchers = state.resource_watchers.entry(plural.to_string()).or_default();
        watchers.retain(|w| !w.is_closed());
        watchers.len()
    }
}

#[async_trait]
impl StreamResourceApi for InMemoryCluster {
    async fn watch_custom_resource(
        &self,
        coordinates: &ApiCoordinates,
        _namespace: Option<&str>,
        buffer_capacity: usize,
    ) -> Result<EventStream<DynamicObject>> {
        let mut state = self.state.lock().unwrap();
        if state.missing_plurals.contains(&coordinates.plural) {
            return Err(OperatorError::WatchTargetMissing(coordinates.to_string()));
        }
        let (sender, stream) = bounded_channel(coordinates.plural.clone(), buffer_capacity);
        state
            .resource_watchers
            .entry(coordinates.plural.clone())
            .or_default()
            .push(sender);
        Ok(stream)
    }

    async fn get_custom_resource(
        &self,
        coordinates: &ApiCoordinates,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let mut state = self.state.lock().unwrap();
        state.check("get_custom_resource")?;
        let key = (coordinates.plural.clone(), namespace.to_string(), name.to_string());
        Ok(state.objects.get(&key).cloned())
    }

    async fn patch_custom_resource_status(
        &self,
        coordinates: &ApiCoordinates,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check("patch_custom_resource_status")?;
        let version = state.bump();
        let key = (coordinates.plural.clone(), namespace.to_string(), name.to_string());
        let object = state
            .objects
            .get_mut(&key)
            .ok_or_else(|| api_error(404, "not found"))?;
        object.data["status"] = status.clone();
        object.metadata.resource_version = Some(version);
        let phase = status["phase"].as_str().unwrap_or_default().to_string();
        state.calls.push(format!(
            "patch_status {}/{}/{} {}",
            coordinates.plural, namespace, name, phase
        ));
        Ok(())
    }

    async fn annotate_resource(
        &self,
        coordinates: &ApiCoordinates,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check("annotate_resource")?;
        let version = state.bump();
        let object_key = (coordinates.plural.clone(), namespace.to_string(), name.to_string());
        let object = state
            .objects
            .get_mut(&object_key)
            .ok_or_else(|| api_error(404, "not found"))?;
        let annotations = object.metadata.annotations.get_or_insert_with(BTreeMap::new);
        match value {
            Some(v) => {
                annotations.insert(key.to_string(), v.to_string());
            }
            None => {
                annotations.remove(key);
            }
        }
        object.metadata.resource_version = Some(version);
        state.calls.push(format!(
            "annotate {}/{}/{} {}={}",
            coordinates.plural,
            namespace,
            name,
            key,
            value.unwrap_or("<removed>")
        ));
        Ok(())
    }
}

#[async_trait]
impl JobApi for InMemoryCluster {
    async fn watch_jobs(
        &self,
        _namespace: Option<&str>,
        buffer_capacity: usize,
    ) -> Result<EventStream<Job>> {
        let (sender, stream) = bounded_channel("jobs", buffer_capacity);
        self.state.lock().unwrap().job_watchers.push(sender);
        Ok(stream)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let mut state = self.state.lock().unwrap();
        state.check("get_job")?;
        Ok(state.jobs.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn send_job(&self, job: &Job, namespace: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check("send_job")?;
        let key = (namespace.to_string(), job.name_any());
        if state.jobs.contains_key(&key) {
            return Err(api_error(409, "already exists"));
        }
        let mut job = job.clone();
        job.metadata.resource_version = Some(state.bump());
        state.calls.push(format!("send_job {}/{}", key.0, key.1));
        state.jobs.insert(key, job);
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check("delete_job")?;
        let key = (namespace.to_string(), name.to_string());
        state
            .jobs
            .remove(&key)
            .ok_or_else(|| api_error(404, "not found"))?;
        state.calls.push(format!("delete_job {}/{}", namespace, name));
        Ok(())
    }

    async fn annotate_job(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check("annotate_job")?;
        let version = state.bump();
        let job = state
            .jobs
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| api_error(404, "not found"))?;
        let annotations = job.metadata.annotations.get_or_insert_with(BTreeMap::new);
        match value {
            Some(v) => {
                annotations.insert(key.to_string(), v.to_string());
            }
            None => {
                annotations.remove(key);
            }
        }
        job.metadata.resource_version = Some(version);
        state.calls.push(format!(
            "annotate_job {}/{} {}={}",
            namespace,
            name,
            key,
            value.unwrap_or("<removed>")
        ));
        Ok(())
    }
}

/// Polls `condition` until it holds, yielding to spawned tasks in between
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}
