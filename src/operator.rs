//! Operator host
//!
//! Wires the accessors, the StreamClass cache, the kind supervisor and the
//! job reconciler together and keeps them running until shutdown.

use crate::accessors::{JobApi, StreamResourceApi};
use crate::cache::StreamClassCache;
use crate::config::OperatorConfig;
use crate::controllers::{JobEventReconciler, KindSupervisor, Pipeline, PipelineContext};
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The stream operator: one supervisor plus the job event pipeline
pub struct Operator {
    supervisor: KindSupervisor,
    job_reconciler: JobEventReconciler,
    restart_delay: Duration,
}

impl Operator {
    pub fn new(
        resources: Arc<dyn StreamResourceApi>,
        jobs: Arc<dyn JobApi>,
        config: &OperatorConfig,
    ) -> Self {
        let classes = Arc::new(StreamClassCache::new(config.stream_class_cache_capacity));
        let context = PipelineContext::new(
            resources,
            jobs,
            classes,
            config.namespace.clone(),
            config.dedup_capacity,
        );
        Self {
            supervisor: KindSupervisor::new(
                context.clone(),
                config.restart_delay(),
                config.stream_class_buffer_capacity,
            ),
            job_reconciler: JobEventReconciler::new(context, config.job_buffer_capacity),
            restart_delay: config.restart_delay(),
        }
    }

    /// Cancelling this token shuts the operator down
    pub fn cancellation_token(&self) -> CancellationToken {
        self.supervisor.cancellation_token()
    }

    pub fn supervisor(&self) -> &KindSupervisor {
        &self.supervisor
    }

    /// Runs until the cancellation token fires, then stops every pipeline
    pub async fn run(&self) -> Result<()> {
        let cancel = self.cancellation_token();
        let job_pipeline = self.job_reconciler.name();
        info!("Starting stream operator");

        tokio::join!(
            keep_running("kind-supervisor", &cancel, self.restart_delay, || {
                self.supervisor.start()
            }),
            keep_running(&job_pipeline, &cancel, self.restart_delay, || {
                self.job_reconciler.run(cancel.clone())
            }),
        );

        self.supervisor.stop().await;
        info!("Stream operator stopped");
        Ok(())
    }
}

/// Runs `run` again after each failure until `cancel` fires
async fn keep_running<F, Fut>(name: &str, cancel: &CancellationToken, delay: Duration, mut run: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        match run().await {
            Ok(()) if cancel.is_cancelled() => return,
            Ok(()) => info!(pipeline = %name, "Pipeline ended; restarting"),
            Err(e) => error!(pipeline = %name, error = %e, "Pipeline failed; restarting"),
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
