//! Resource events and bounded event buffers
//!
//! Watches feed events into a bounded buffer. A full buffer rejects the
//! event instead of blocking the watch: the producer stops and the consumer
//! sees a single [`OperatorError::BufferOverflow`] once the buffered events
//! are drained. Initial list results are the exception: they wait for space,
//! so a kind with more resources than the buffer holds can still attach.

use crate::error::{OperatorError, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Kind of change a watch reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// A change to a resource as reported by a watch
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvent<K> {
    pub event_type: EventType,
    pub resource: K,
}

impl<K> ResourceEvent<K> {
    pub fn new(event_type: EventType, resource: K) -> Self {
        Self {
            event_type,
            resource,
        }
    }

    pub fn added(resource: K) -> Self {
        Self::new(EventType::Added, resource)
    }

    pub fn modified(resource: K) -> Self {
        Self::new(EventType::Modified, resource)
    }

    pub fn deleted(resource: K) -> Self {
        Self::new(EventType::Deleted, resource)
    }
}

/// Stream of events from a watch subscription
pub type EventStream<K> = BoxStream<'static, Result<ResourceEvent<K>>>;

/// Producer half of a bounded event buffer
pub struct EventSender<K> {
    tx: mpsc::Sender<Result<ResourceEvent<K>>>,
    overflowed: Arc<AtomicBool>,
    source_name: String,
    capacity: usize,
}

impl<K> Clone for EventSender<K> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            overflowed: Arc::clone(&self.overflowed),
            source_name: self.source_name.clone(),
            capacity: self.capacity,
        }
    }
}

impl<K: Send + 'static> EventSender<K> {
    /// Pushes an event without waiting.
    ///
    /// Fails with [`OperatorError::BufferOverflow`] when the buffer is full and
    /// with [`OperatorError::SubscriptionClosed`] when the consumer is gone.
    pub fn push(&self, event: ResourceEvent<K>) -> Result<()> {
        if self.overflowed.load(Ordering::SeqCst) {
            return Err(self.overflow_error());
        }
        match self.tx.try_send(Ok(event)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.overflowed.store(true, Ordering::SeqCst);
                Err(self.overflow_error())
            }
            Err(TrySendError::Closed(_)) => {
                Err(OperatorError::SubscriptionClosed(self.source_name.clone()))
            }
        }
    }

    /// Pushes an event, waiting for buffer space.
    ///
    /// Used for list results, whose size the buffer does not bound.
    pub async fn send(&self, event: ResourceEvent<K>) -> Result<()> {
        if self.overflowed.load(Ordering::SeqCst) {
            return Err(self.overflow_error());
        }
        self.tx
            .send(Ok(event))
            .await
            .map_err(|_| OperatorError::SubscriptionClosed(self.source_name.clone()))
    }

    /// Terminates the subscription with an error delivered after buffered events
    pub async fn fail(self, error: OperatorError) {
        if matches!(error, OperatorError::BufferOverflow { .. }) {
            // Delivered by the consumer once the buffer drains
            return;
        }
        let _ = self.tx.send(Err(error)).await;
    }

    /// Resolves once the consumer has dropped the stream
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    fn overflow_error(&self) -> OperatorError {
        OperatorError::BufferOverflow {
            source_name: self.source_name.clone(),
            capacity: self.capacity,
        }
    }
}

/// Creates a bounded event buffer of `capacity` events
pub fn bounded_channel<K: Send + 'static>(
    source_name: impl Into<String>,
    capacity: usize,
) -> (EventSender<K>, EventStream<K>) {
    let capacity = capacity.max(1);
    let source_name = source_name.into();
    let (tx, rx) = mpsc::channel(capacity);
    let overflowed = Arc::new(AtomicBool::new(false));

    let sender = EventSender {
        tx,
        overflowed: Arc::clone(&overflowed),
        source_name: source_name.clone(),
        capacity,
    };

    let stream = futures::stream::unfold(Some(rx), move |rx| {
        let overflowed = Arc::clone(&overflowed);
        let source_name = source_name.clone();
        async move {
            let mut rx = rx?;
            if overflowed.load(Ordering::SeqCst) {
                // Events accepted before the overflow are still delivered
                return match rx.try_recv() {
                    Ok(item) => Some((item, Some(rx))),
                    Err(_) => Some((
                        Err(OperatorError::BufferOverflow {
                            source_name,
                            capacity,
                        }),
                        None,
                    )),
                };
            }
            rx.recv().await.map(|item| (item, Some(rx)))
        }
    })
    .boxed();

    (sender, stream)
}
