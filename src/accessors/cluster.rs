//! Kubernetes API implementation of the resource accessors

use crate::accessors::{JobApi, StreamResourceApi};
use crate::crd::ApiCoordinates;
use crate::error::{OperatorError, Result};
use crate::events::{bounded_channel, EventSender, EventStream, ResourceEvent};
use crate::jobs::managed_jobs_selector;
use async_trait::async_trait;
use futures::{pin_mut, StreamExt};
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use tracing::{debug, info, warn};

/// Resource accessors backed by a Kubernetes client
#[derive(Clone)]
pub struct KubeAccessor {
    client: Client,
    field_manager: String,
}

impl KubeAccessor {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn dynamic_api(&self, coordinates: &ApiCoordinates, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = coordinates.api_resource();
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn job_api(&self, namespace: Option<&str>) -> Api<Job> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

fn annotation_patch(key: &str, value: Option<&str>) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "annotations": { key: value }
        }
    })
}

fn not_found_to_none<T>(result: std::result::Result<T, kube::Error>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl StreamResourceApi for KubeAccessor {
    async fn watch_custom_resource(
        &self,
        coordinates: &ApiCoordinates,
        namespace: Option<&str>,
        buffer_capacity: usize,
    ) -> Result<EventStream<DynamicObject>> {
        let api = self.dynamic_api(coordinates, namespace);
        Ok(spawn_watch(
            api,
            coordinates.plural.clone(),
            watcher::Config::default(),
            buffer_capacity,
        ))
    }

    async fn get_custom_resource(
        &self,
        coordinates: &ApiCoordinates,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let api = self.dynamic_api(coordinates, Some(namespace));
        not_found_to_none(api.get(name).await)
    }

    async fn patch_custom_resource_status(
        &self,
        coordinates: &ApiCoordinates,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()> {
        let api = self.dynamic_api(coordinates, Some(namespace));
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &self.patch_params(), &Patch::Merge(&patch))
            .await?;
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
        let api = self.dynamic_api(coordinates, Some(namespace));
        api.patch(
            name,
            &self.patch_params(),
            &Patch::Merge(&annotation_patch(key, value)),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobApi for KubeAccessor {
    async fn watch_jobs(
        &self,
        namespace: Option<&str>,
        buffer_capacity: usize,
    ) -> Result<EventStream<Job>> {
        let api = self.job_api(namespace);
        Ok(spawn_watch(
            api,
            "jobs".to_string(),
            watcher::Config::default().labels(&managed_jobs_selector()),
            buffer_capacity,
        ))
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let api = self.job_api(Some(namespace));
        not_found_to_none(api.get(name).await)
    }

    async fn send_job(&self, job: &Job, namespace: &str) -> Result<()> {
        let api = self.job_api(Some(namespace));
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        api.create(&params, job).await?;
        info!(job = %job.name_any(), namespace = %namespace, "Created streaming job");
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let api = self.job_api(Some(namespace));
        api.delete(name, &DeleteParams::background()).await?;
        info!(job = %name, namespace = %namespace, "Deleted streaming job");
        Ok(())
    }

    async fn annotate_job(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let api = self.job_api(Some(namespace));
        api.patch(
            name,
            &self.patch_params(),
            &Patch::Merge(&annotation_patch(key, value)),
        )
        .await?;
        Ok(())
    }
}

/// Identity of a watched resource
type ObjectKey = (Option<String>, String);

fn object_key<K: Resource>(resource: &K) -> ObjectKey {
    (resource.namespace(), resource.name_any())
}

/// Turns watcher events into Added/Modified/Deleted events.
///
/// `watcher` reports creations and updates alike as applies; the tracker
/// tells them apart by the resources it has already seen. During a relist,
/// resources seen before come out as `Modified`.
struct WatchTracker {
    known: HashSet<ObjectKey>,
    listed: Option<HashSet<ObjectKey>>,
}

impl WatchTracker {
    fn new() -> Self {
        Self {
            known: HashSet::new(),
            listed: None,
        }
    }

    /// Whether a list is in progress
    fn is_listing(&self) -> bool {
        self.listed.is_some()
    }

    fn apply<K: Resource>(&mut self, event: watcher::Event<K>) -> Option<ResourceEvent<K>> {
        match event {
            watcher::Event::Init => {
                self.listed = Some(HashSet::new());
                None
            }
            watcher::Event::InitApply(resource) => {
                let key = object_key(&resource);
                let seen = self.known.contains(&key);
                self.listed.get_or_insert_with(HashSet::new).insert(key);
                Some(if seen {
                    ResourceEvent::modified(resource)
                } else {
                    ResourceEvent::added(resource)
                })
            }
            watcher::Event::InitDone => {
                if let Some(listed) = self.listed.take() {
                    self.known = listed;
                }
                None
            }
            watcher::Event::Apply(resource) => {
                if self.known.insert(object_key(&resource)) {
                    Some(ResourceEvent::added(resource))
                } else {
                    Some(ResourceEvent::modified(resource))
                }
            }
            watcher::Event::Delete(resource) => {
                self.known.remove(&object_key(&resource));
                Some(ResourceEvent::deleted(resource))
            }
        }
    }
}

/// How a watch error affects the subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchFailure {
    /// The watched resource type does not exist
    TargetMissing,
    /// The resource version expired; the watcher relists
    Expired,
    /// Retried by the watcher after a backoff
    Transient,
}

fn classify_watch_error(error: &watcher::Error) -> WatchFailure {
    let code = match error {
        watcher::Error::InitialListFailed(kube::Error::Api(response))
        | watcher::Error::WatchStartFailed(kube::Error::Api(response))
        | watcher::Error::WatchFailed(kube::Error::Api(response))
        | watcher::Error::WatchError(response) => Some(response.code),
        _ => None,
    };
    match code {
        Some(404) => WatchFailure::TargetMissing,
        Some(410) => WatchFailure::Expired,
        _ => WatchFailure::Transient,
    }
}

/// Runs a watcher for `api` in a background task feeding a bounded buffer
fn spawn_watch<K>(
    api: Api<K>,
    source_name: String,
    config: watcher::Config,
    buffer_capacity: usize,
) -> EventStream<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let (sender, stream) = bounded_channel(source_name, buffer_capacity);
    tokio::spawn(async move {
        match watch_loop(api, config, &sender).await {
            Err(OperatorError::SubscriptionClosed(source)) => {
                debug!(source = %source, "Watch consumer gone, stopping watch");
            }
            Err(e) => {
                warn!(source = %sender.source_name(), error = %e, "Watch terminated");
                sender.fail(e).await;
            }
            Ok(()) => {}
        }
    });
    stream
}

async fn watch_loop<K>(api: Api<K>, config: watcher::Config, sender: &EventSender<K>) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let events = watcher(api, config).default_backoff();
    pin_mut!(events);
    let mut tracker = WatchTracker::new();

    loop {
        let next = tokio::select! {
            _ = sender.closed() => {
                return Err(OperatorError::SubscriptionClosed(sender.source_name().to_string()));
            }
            next = events.next() => next,
        };

        match next {
            Some(Ok(event)) => {
                let listing = tracker.is_listing();
                if let Some(event) = tracker.apply(event) {
                    if listing {
                        sender.send(event).await?;
                    } else {
                        sender.push(event)?;
                    }
                }
            }
            Some(Err(e)) => match classify_watch_error(&e) {
                WatchFailure::TargetMissing => {
                    warn!(source = %sender.source_name(), "Watched resource type not found");
                    return Err(OperatorError::WatchTargetMissing(
                        sender.source_name().to_string(),
                    ));
                }
                WatchFailure::Expired => {
                    debug!(source = %sender.source_name(), "Resource version expired, relisting");
                }
                WatchFailure::Transient => {
                    warn!(source = %sender.source_name(), error = %e, "Watch failed, retrying");
                }
            },
            None => return Ok(()),
        }
    }
}
