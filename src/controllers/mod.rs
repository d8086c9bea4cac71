//! Controllers for the Arcane stream operator
//!
//! The stream reconciler turns stream definition events into commands, the
//! job reconciler does the same for job events, and the supervisor runs one
//! stream reconciler per registered stream kind.

pub mod handlers;
pub mod job;
pub mod stream;
pub mod supervisor;

pub use handlers::CommandHandler;
pub use job::JobEventReconciler;
pub use stream::StreamReconciler;
pub use supervisor::KindSupervisor;

use crate::accessors::{JobApi, StreamResourceApi};
use crate::cache::StreamClassCache;
use crate::error::{OperatorError, Result};
use crate::events::{EventStream, ResourceEvent};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Common trait for event processing pipelines
#[async_trait::async_trait]
pub trait Pipeline: Send + Sync {
    /// Consume events until cancelled or a fatal error occurs
    async fn run(&self, cancel: CancellationToken) -> Result<()>;

    /// Pipeline name for logging
    fn name(&self) -> String;
}

/// Collaborators shared by every pipeline
#[derive(Clone)]
pub struct PipelineContext {
    pub resources: Arc<dyn StreamResourceApi>,
    pub jobs: Arc<dyn JobApi>,
    pub handler: CommandHandler,
    pub classes: Arc<StreamClassCache>,
    /// Namespace to watch, all namespaces when `None`
    pub namespace: Option<String>,
    /// Resource keys remembered by each pipeline's deduplicator
    pub dedup_capacity: usize,
}

impl PipelineContext {
    pub fn new(
        resources: Arc<dyn StreamResourceApi>,
        jobs: Arc<dyn JobApi>,
        classes: Arc<StreamClassCache>,
        namespace: Option<String>,
        dedup_capacity: usize,
    ) -> Self {
        let handler = CommandHandler::new(resources.clone(), jobs.clone(), classes.clone());
        Self {
            resources,
            jobs,
            handler,
            classes,
            namespace,
            dedup_capacity,
        }
    }
}

/// Feeds events to `process` one at a time until cancelled.
///
/// Fatal errors end the loop and are returned; any other error is logged and
/// the next event is processed. An event already being processed completes
/// even if cancellation arrives meanwhile.
pub(crate) async fn drive_events<K, F, Fut>(
    name: &str,
    mut events: EventStream<K>,
    cancel: &CancellationToken,
    mut process: F,
) -> Result<()>
where
    F: FnMut(ResourceEvent<K>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(pipeline = %name, "Pipeline cancelled");
                return Ok(());
            }
            next = events.next() => next,
        };

        let result = match next {
            Some(Ok(event)) => process(event).await,
            Some(Err(e)) => Err(e),
            None => Err(OperatorError::SubscriptionClosed(name.to_string())),
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                error!(pipeline = %name, error = %e, "Pipeline terminated");
                return Err(e);
            }
            Err(e) => {
                warn!(pipeline = %name, error = %e, "Failed to process event");
            }
        }
    }
}
