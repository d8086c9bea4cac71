//! StreamClass lookup cache
//!
//! The command handler needs the StreamClass of a definition's kind to build
//! its job. The supervisor owns this cache: it inserts a class when the
//! kind's pipeline is attached and removes it on detach.

use crate::crd::StreamClass;
use crate::error::{OperatorError, Result};
use kube::ResourceExt;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Bounded map from stream kind to its StreamClass
pub struct StreamClassCache {
    entries: RwLock<HashMap<String, StreamClass>>,
    capacity: usize,
}

impl StreamClassCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Inserts or replaces the class for its kind.
    ///
    /// A kind is served by one StreamClass at a time: a class with a
    /// different id claiming an already cached kind is rejected.
    pub async fn insert(&self, class: StreamClass) -> Result<()> {
        let kind = class.spec.kind_ref.clone();
        let id = class.stream_class_id();
        let mut entries = self.entries.write().await;
        match entries.get(&kind) {
            Some(existing) if existing.stream_class_id() != id => {
                return Err(OperatorError::Configuration(format!(
                    "Kind {} is already served by StreamClass {}/{}",
                    kind,
                    existing.namespace().unwrap_or_default(),
                    existing.name_any()
                )));
            }
            Some(_) => {}
            None if entries.len() >= self.capacity => {
                return Err(OperatorError::Configuration(format!(
                    "Stream class cache is full ({} kinds); cannot register {}",
                    self.capacity, kind
                )));
            }
            None => {}
        }
        debug!(kind = %kind, stream_class = %id, "Caching stream class");
        entries.insert(kind, class);
        Ok(())
    }

    pub async fn get(&self, kind: &str) -> Option<StreamClass> {
        self.entries.read().await.get(kind).cloned()
    }

    /// Removes the entry of the class's kind if it belongs to this class
    pub async fn remove(&self, class: &StreamClass) -> bool {
        let mut entries = self.entries.write().await;
        let owned = entries
            .get(&class.spec.kind_ref)
            .is_some_and(|cached| cached.stream_class_id() == class.stream_class_id());
        if owned {
            entries.remove(&class.spec.kind_ref);
        }
        owned
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crd::StreamClassSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    pub(crate) fn stream_class(name: &str, kind: &str, plural: &str) -> StreamClass {
        StreamClass {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("streams".to_string()),
                generation: Some(1),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            spec: StreamClassSpec {
                api_group_ref: "arcane.dev".to_string(),
                api_version: "v1".to_string(),
                plural_name: plural.to_string(),
                kind_ref: kind.to_string(),
                secret_ref_fields: vec!["connectionSecretRef".to_string()],
                max_buffer_capacity: 64,
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let cache = StreamClassCache::new(4);
        cache
            .insert(stream_class("sqlserver", "SqlServerStream", "sqlserverstreams"))
            .await
            .unwrap();
        assert!(cache.get("SqlServerStream").await.is_some());
        assert!(cache.get("KafkaStream").await.is_none());
        assert!(
            cache
                .remove(&stream_class("sqlserver", "SqlServerStream", "sqlserverstreams"))
                .await
        );
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_one_class_per_kind() {
        let cache = StreamClassCache::new(4);
        let owner = stream_class("sqlserver", "SqlServerStream", "sqlserverstreams");
        let mut rival = owner.clone();
        rival.metadata.namespace = Some("other".to_string());
        cache.insert(owner.clone()).await.unwrap();

        let err = cache.insert(rival.clone()).await.unwrap_err();
        assert!(matches!(err, OperatorError::Configuration(_)));

        // The rival cannot evict the owner's entry
        assert!(!cache.remove(&rival).await);
        assert_eq!(
            cache.get("SqlServerStream").await.and_then(|c| c.namespace()),
            Some("streams".to_string())
        );
    }

    #[tokio::test]
    async fn test_capacity_bound() {
        let cache = StreamClassCache::new(1);
        cache
            .insert(stream_class("sqlserver", "SqlServerStream", "sqlserverstreams"))
            .await
            .unwrap();
        // Replacing an existing kind is always allowed
        cache
            .insert(stream_class("sqlserver", "SqlServerStream", "sqlserverstreams"))
            .await
            .unwrap();
        let err = cache
            .insert(stream_class("kafka", "KafkaStream", "kafkastreams"))
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::Configuration(_)));
    }
}
