//! Watch event deduplication
//!
//! Watches replay events on reconnect and relist. The deduplicator remembers
//! the last resource version seen per `(kind, namespace, name)` and drops
//! events that repeat it.

use crate::events::ResourceEvent;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kube::{Resource, ResourceExt};
use tracing::debug;

/// Cache key of a watched resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// Drops events whose resource version was already seen for the same resource
pub struct EventDeduplicator {
    seen: DashMap<EventKey, String>,
    capacity: usize,
}

impl EventDeduplicator {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns the event if it carries a new resource version, `None` otherwise.
    ///
    /// Events without a resource version cannot be compared and always pass.
    pub fn filter<K: Resource>(
        &self,
        kind: &str,
        event: ResourceEvent<K>,
    ) -> Option<ResourceEvent<K>> {
        let Some(version) = event.resource.resource_version() else {
            return Some(event);
        };
        let key = EventKey {
            kind: kind.to_string(),
            namespace: event.resource.namespace().unwrap_or_default(),
            name: event.resource.name_any(),
        };

        if !self.seen.contains_key(&key) && self.seen.len() >= self.capacity {
            self.evict_one();
        }

        match self.seen.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get() == &version {
                    debug!(
                        kind = %entry.key().kind,
                        namespace = %entry.key().namespace,
                        name = %entry.key().name,
                        resource_version = %version,
                        event_type = ?event.event_type,
                        "Dropping duplicate event"
                    );
                    None
                } else {
                    entry.insert(version);
                    Some(event)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(version);
                Some(event)
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn evict_one(&self) {
        // The iterator guard must be released before removing
        let victim = self.seen.iter().next().map(|entry| entry.key().clone());
        if let Some(victim) = victim {
            self.seen.remove(&victim);
        }
    }
}
