//! Kind Lifecycle Supervisor
//!
//! Watches StreamClass resources and runs one [`StreamReconciler`] per
//! registered stream kind. Each pipeline runs under its own child of the
//! master cancellation token, so detaching one kind never touches another.
//! A pipeline that terminates on a fatal error is marked FAILED and attached
//! again with a fresh subscription after the restart delay.

use crate::commands::{Command, StreamClassRef};
use crate::conditions::{REASON_ATTACHED, REASON_PIPELINE_FAILED, REASON_STOPPED};
use crate::controllers::{drive_events, Pipeline, PipelineContext, StreamReconciler};
use crate::crd::{parse_dynamic, StreamClass, StreamClassPhase};
use crate::dedup::EventDeduplicator;
use crate::error::{OperatorError, Result};
use crate::events::{EventType, ResourceEvent};
use futures::future::BoxFuture;
use futures::FutureExt;
use kube::api::DynamicObject;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A running pipeline of one stream kind
struct PipelineHandle {
    class: StreamClass,
    generation: Option<i64>,
    seq: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PipelineHandle {
    /// Cancels the pipeline and waits for its in-flight event to finish
    async fn stop(self) -> StreamClass {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!(kind = %self.class.spec.kind_ref, error = %e, "Stream pipeline task failed");
        }
        self.class
    }
}

struct SupervisorInner {
    context: PipelineContext,
    handles: RwLock<HashMap<String, PipelineHandle>>,
    cancel: CancellationToken,
    next_seq: AtomicU64,
    restart_delay: Duration,
    class_buffer_capacity: usize,
}

/// Attaches and detaches stream pipelines as stream kinds come and go
#[derive(Clone)]
pub struct KindSupervisor {
    inner: Arc<SupervisorInner>,
}

fn class_ref(class: &StreamClass) -> StreamClassRef {
    StreamClassRef {
        namespace: class.namespace().unwrap_or_else(|| "default".to_string()),
        name: class.name_any(),
    }
}

impl SupervisorInner {
    /// Spawns a pipeline task for `class` under a fresh child token
    fn spawn(self: &Arc<Self>, class: StreamClass, restarted: bool) -> PipelineHandle {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let token = self.cancel.child_token();
        let task = tokio::spawn(run_pipeline(
            Arc::clone(self),
            class.clone(),
            seq,
            token.clone(),
            restarted,
        ));
        PipelineHandle {
            generation: class.metadata.generation,
            class,
            seq,
            token,
            task,
        }
    }

    async fn write_status(&self, class: &StreamClass, phase: StreamClassPhase, reason: &str, message: &str) {
        let command = Command::set_stream_class_status(class_ref(class), phase, reason, message);
        if let Err(e) = self.context.handler.handle(&command).await {
            warn!(stream_class = %class.name_any(), error = %e, "Failed to update StreamClass status");
        }
    }

    /// Replaces a terminated pipeline unless it was detached or replaced meanwhile
    async fn restart(self: &Arc<Self>, class: StreamClass, seq: u64) {
        let id = class.stream_class_id();
        {
            let mut handles = self.handles.write().await;
            if self.cancel.is_cancelled() || !handles.get(&id).is_some_and(|h| h.seq == seq) {
                debug!(kind = %class.spec.kind_ref, "Pipeline was detached; not restarting");
                return;
            }
            // The old handle's task is the caller, so it is dropped rather than awaited
            let handle = self.spawn(class.clone(), true);
            handles.insert(id, handle);
        }
        info!(kind = %class.spec.kind_ref, "Restarting stream pipeline");
    }
}

fn run_pipeline(
    inner: Arc<SupervisorInner>,
    class: StreamClass,
    seq: u64,
    token: CancellationToken,
    restarted: bool,
) -> BoxFuture<'static, ()> {
    async move {
        if restarted && !token.is_cancelled() {
            inner
                .write_status(&class, StreamClassPhase::Ready, REASON_ATTACHED, "Stream pipeline restarted")
                .await;
        }
        let reconciler = StreamReconciler::new(&class, inner.context.clone());
        let result = reconciler.run(token.clone()).await;
        let error = match result {
            Ok(()) => return,
            Err(_) if token.is_cancelled() => return,
            Err(e) => e,
        };

        error!(kind = %class.spec.kind_ref, error = %error, "Stream pipeline failed");
        inner
            .write_status(
                &class,
                StreamClassPhase::Failed,
                REASON_PIPELINE_FAILED,
                &error.to_string(),
            )
            .await;

        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(inner.restart_delay) => {
                inner.restart(class, seq).await;
            }
        }
    }
    .boxed()
}

impl KindSupervisor {
    pub fn new(context: PipelineContext, restart_delay: Duration, class_buffer_capacity: usize) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                context,
                handles: RwLock::new(HashMap::new()),
                cancel: CancellationToken::new(),
                next_seq: AtomicU64::new(0),
                restart_delay,
                class_buffer_capacity,
            }),
        }
    }

    /// Master token; cancelling it stops every pipeline
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Starts the pipeline of a stream kind.
    ///
    /// Attaching a kind whose pipeline already runs the same generation is a
    /// no-op; a new generation replaces the running pipeline.
    pub async fn attach(&self, class: StreamClass) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(OperatorError::InvalidState(
                "Supervisor is stopped".to_string(),
            ));
        }
        let id = class.stream_class_id();
        let kind = class.spec.kind_ref.clone();

        let previous = {
            let mut handles = self.inner.handles.write().await;
            if let Some(existing) = handles.get(&id) {
                if existing.generation == class.metadata.generation && !existing.task.is_finished() {
                    debug!(kind = %kind, "Stream pipeline already attached");
                    return Ok(());
                }
            }
            handles.remove(&id)
        };
        if let Some(previous) = previous {
            info!(kind = %kind, "Replacing stream pipeline");
            previous.stop().await;
        }

        if let Err(e) = self.inner.context.classes.insert(class.clone()).await {
            error!(kind = %kind, error = %e, "Cannot attach stream pipeline");
            self.inner
                .write_status(&class, StreamClassPhase::Failed, REASON_PIPELINE_FAILED, &e.to_string())
                .await;
            return Err(e);
        }

        {
            let mut handles = self.inner.handles.write().await;
            if let Some(raced) = handles.insert(id, self.inner.spawn(class.clone(), false)) {
                raced.token.cancel();
            }
        }
        info!(kind = %kind, resource = %class.target_coordinates(), "Attached stream pipeline");
        self.inner
            .write_status(&class, StreamClassPhase::Ready, REASON_ATTACHED, "Stream pipeline attached")
            .await;
        Ok(())
    }

    /// Stops the pipeline of a stream kind; other kinds are unaffected
    pub async fn detach(&self, class: &StreamClass) {
        let id = class.stream_class_id();
        let handle = self.inner.handles.write().await.remove(&id);
        match handle {
            Some(handle) => {
                let class = handle.stop().await;
                self.inner.context.classes.remove(&class).await;
                info!(kind = %class.spec.kind_ref, "Detached stream pipeline");
            }
            None => debug!(kind = %class.spec.kind_ref, "No stream pipeline to detach"),
        }
    }

    /// Watches StreamClasses until the master token is cancelled
    pub async fn start(&self) -> Result<()> {
        let events = self
            .inner
            .context
            .resources
            .watch_custom_resource(
                &StreamClass::api_coordinates(),
                self.inner.context.namespace.as_deref(),
                self.inner.class_buffer_capacity,
            )
            .await?;
        let dedup = EventDeduplicator::new(self.inner.context.dedup_capacity);

        info!("Starting kind supervisor");
        drive_events("kind-supervisor", events, &self.inner.cancel, |event| {
            self.on_class_event(&dedup, event)
        })
        .await
    }

    async fn on_class_event(&self, dedup: &EventDeduplicator, event: ResourceEvent<DynamicObject>) -> Result<()> {
        let Some(event) = dedup.filter("StreamClass", event) else {
            return Ok(());
        };
        let class: StreamClass = parse_dynamic(event.resource)?;
        match event.event_type {
            EventType::Added | EventType::Modified => self.attach(class).await,
            EventType::Deleted => {
                self.detach(&class).await;
                Ok(())
            }
        }
    }

    /// Cancels every pipeline and marks each attached kind STOPPED
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<PipelineHandle> = self
            .inner
            .handles
            .write()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();

        for handle in handles {
            let class = handle.stop().await;
            self.inner.context.classes.remove(&class).await;
            self.inner
                .write_status(&class, StreamClassPhase::Stopped, REASON_STOPPED, "Operator stopped")
                .await;
        }
        info!("Kind supervisor stopped");
    }

    pub async fn is_attached(&self, stream_class_id: &str) -> bool {
        self.inner.handles.read().await.contains_key(stream_class_id)
    }

    /// Ids of the attached kinds, sorted
    pub async fn attached(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.handles.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[cfg(test)]
    async fn pipeline_seq(&self, stream_class_id: &str) -> Option<u64> {
        self.inner
            .handles
            .read()
            .await
            .get(stream_class_id)
            .map(|h| h.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessors::memory::{eventually, InMemoryCluster};
    use crate::cache::tests::stream_class;
    use crate::controllers::handlers::tests::spec;
    use crate::controllers::tests::context;
    use crate::crd::stream_definition::tests::stream;

    fn register(cluster: &InMemoryCluster, name: &str, kind: &str, plural: &str) -> StreamClass {
        let class = stream_class(name, kind, plural);
        cluster.insert_object(
            &StreamClass::api_coordinates(),
            serde_json::from_value(serde_json::to_value(&class).unwrap()).unwrap(),
        );
        class
    }

    fn phase(cluster: &InMemoryCluster, name: &str) -> Option<String> {
        cluster
            .object(&StreamClass::api_coordinates(), "streams", name)
            .and_then(|o| o.data["status"]["phase"].as_str().map(str::to_string))
    }

    async fn supervisor() -> (Arc<InMemoryCluster>, KindSupervisor) {
        let (cluster, context) = context().await;
        let supervisor = KindSupervisor::new(context, Duration::from_millis(10), 16);
        (cluster, supervisor)
    }

    #[tokio::test]
    async fn test_attach_starts_pipeline_and_reports_ready() {
        let (cluster, supervisor) = supervisor().await;
        let class = register(&cluster, "sqlserver", "SqlServerStream", "sqlserverstreams");

        supervisor.attach(class.clone()).await.unwrap();

        eventually(|| cluster.watcher_count("sqlserverstreams") == 1).await;
        assert!(supervisor.is_attached("streams-sqlserverstream").await);
        assert_eq!(phase(&cluster, "sqlserver").as_deref(), Some("READY"));
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_attach_same_generation_is_noop() {
        let (cluster, supervisor) = supervisor().await;
        let class = register(&cluster, "sqlserver", "SqlServerStream", "sqlserverstreams");

        supervisor.attach(class.clone()).await.unwrap();
        let seq = supervisor.pipeline_seq("streams-sqlserverstream").await;
        supervisor.attach(class.clone()).await.unwrap();

        assert_eq!(supervisor.pipeline_seq("streams-sqlserverstream").await, seq);
        eventually(|| cluster.watcher_count("sqlserverstreams") == 1).await;
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_new_generation_replaces_pipeline() {
        let (cluster, supervisor) = supervisor().await;
        let mut class = register(&cluster, "sqlserver", "SqlServerStream", "sqlserverstreams");
        supervisor.attach(class.clone()).await.unwrap();
        let seq = supervisor.pipeline_seq("streams-sqlserverstream").await;

        class.metadata.generation = Some(2);
        supervisor.attach(class).await.unwrap();

        assert_ne!(supervisor.pipeline_seq("streams-sqlserverstream").await, seq);
        assert_eq!(supervisor.attached().await.len(), 1);
        eventually(|| cluster.watcher_count("sqlserverstreams") == 1).await;
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_detach_leaves_other_kinds_running() {
        let (cluster, supervisor) = supervisor().await;
        let sql = register(&cluster, "sqlserver", "SqlServerStream", "sqlserverstreams");
        let kafka = register(&cluster, "kafka", "KafkaStream", "kafkastreams");
        supervisor.attach(sql.clone()).await.unwrap();
        supervisor.attach(kafka.clone()).await.unwrap();
        eventually(|| cluster.watcher_count("kafkastreams") == 1).await;
        let kafka_seq = supervisor.pipeline_seq("streams-kafkastream").await;

        supervisor.detach(&sql).await;

        assert_eq!(supervisor.attached().await, vec!["streams-kafkastream".to_string()]);
        assert_eq!(supervisor.pipeline_seq("streams-kafkastream").await, kafka_seq);
        eventually(|| cluster.watcher_count("sqlserverstreams") == 0).await;

        // The remaining pipeline still reconciles
        let definition = stream("events", spec(), None);
        cluster.emit("kafkastreams", ResourceEvent::added(definition.object().clone()));
        eventually(|| cluster.job("streams", "events").is_some()).await;
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_second_class_for_attached_kind_is_rejected() {
        let (cluster, supervisor) = supervisor().await;
        let owner = register(&cluster, "sqlserver", "SqlServerStream", "sqlserverstreams");
        let mut rival = owner.clone();
        rival.metadata.namespace = Some("other".to_string());
        cluster.insert_object(
            &StreamClass::api_coordinates(),
            serde_json::from_value(serde_json::to_value(&rival).unwrap()).unwrap(),
        );

        supervisor.attach(owner).await.unwrap();
        let err = supervisor.attach(rival.clone()).await.unwrap_err();
        assert!(matches!(err, OperatorError::Configuration(_)));
        assert_eq!(supervisor.attached().await, vec!["streams-sqlserverstream".to_string()]);
        eventually(|| cluster.watcher_count("sqlserverstreams") == 1).await;
        let rival_phase = cluster
            .object(&StreamClass::api_coordinates(), "other", "sqlserver")
            .and_then(|o| o.data["status"]["phase"].as_str().map(str::to_string));
        assert_eq!(rival_phase.as_deref(), Some("FAILED"));

        // Detaching the rival leaves the attached kind able to start jobs
        supervisor.detach(&rival).await;
        assert!(supervisor.inner.context.classes.get("SqlServerStream").await.is_some());
        let definition = stream("orders", spec(), None);
        cluster.emit("sqlserverstreams", ResourceEvent::added(definition.object().clone()));
        eventually(|| cluster.job("streams", "orders").is_some()).await;
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_failed_pipeline_is_reported_and_restarted() {
        let (cluster, supervisor) = supervisor().await;
        let mut class = register(&cluster, "sqlserver", "SqlServerStream", "sqlserverstreams");
        class.spec.max_buffer_capacity = 1;
        supervisor.attach(class).await.unwrap();
        eventually(|| cluster.watcher_count("sqlserverstreams") == 1).await;
        let seq = supervisor.pipeline_seq("streams-sqlserverstream").await;

        for i in 0..3 {
            let definition = stream(&format!("stream-{}", i), spec(), Some("suspended"));
            cluster.emit("sqlserverstreams", ResourceEvent::added(definition.object().clone()));
        }

        eventually(|| {
            cluster
                .calls()
                .contains(&"patch_status streamclasses/streams/sqlserver FAILED".to_string())
        })
        .await;
        eventually(|| phase(&cluster, "sqlserver").as_deref() == Some("READY")).await;
        eventually(|| cluster.watcher_count("sqlserverstreams") == 1).await;
        assert_ne!(supervisor.pipeline_seq("streams-sqlserverstream").await, seq);
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_missing_watch_target_fails_pipeline() {
        let (cluster, supervisor) = supervisor().await;
        let class = register(&cluster, "sqlserver", "SqlServerStream", "sqlserverstreams");
        cluster.remove_resource_type("sqlserverstreams");

        supervisor.attach(class).await.unwrap();

        eventually(|| {
            cluster
                .calls()
                .contains(&"patch_status streamclasses/streams/sqlserver FAILED".to_string())
        })
        .await;
        supervisor.stop().await;
        assert_eq!(phase(&cluster, "sqlserver").as_deref(), Some("STOPPED"));
    }

    #[tokio::test]
    async fn test_stop_marks_kinds_stopped() {
        let (cluster, supervisor) = supervisor().await;
        let sql = register(&cluster, "sqlserver", "SqlServerStream", "sqlserverstreams");
        let kafka = register(&cluster, "kafka", "KafkaStream", "kafkastreams");
        supervisor.attach(sql.clone()).await.unwrap();
        supervisor.attach(kafka).await.unwrap();

        supervisor.stop().await;

        assert!(supervisor.attached().await.is_empty());
        assert_eq!(phase(&cluster, "sqlserver").as_deref(), Some("STOPPED"));
        assert_eq!(phase(&cluster, "kafka").as_deref(), Some("STOPPED"));
        assert!(matches!(
            supervisor.attach(sql).await,
            Err(OperatorError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_start_follows_stream_class_events() {
        let (cluster, supervisor) = supervisor().await;
        let runner = supervisor.clone();
        let task = tokio::spawn(async move { runner.start().await });
        eventually(|| cluster.watcher_count("streamclasses") == 1).await;

        let class = register(&cluster, "sqlserver", "SqlServerStream", "sqlserverstreams");
        let object: DynamicObject =
            serde_json::from_value(serde_json::to_value(&class).unwrap()).unwrap();
        cluster.emit("streamclasses", ResourceEvent::added(object.clone()));
        eventually(|| cluster.watcher_count("sqlserverstreams") == 1).await;
        assert!(supervisor.is_attached("streams-sqlserverstream").await);

        let mut deleted = object;
        deleted.metadata.resource_version = Some("2".to_string());
        cluster.emit("streamclasses", ResourceEvent::deleted(deleted));
        eventually(|| cluster.watcher_count("sqlserverstreams") == 0).await;
        assert!(!supervisor.is_attached("streams-sqlserverstream").await);

        supervisor.stop().await;
        task.await.unwrap().unwrap();
    }
}
