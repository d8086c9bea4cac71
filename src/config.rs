//! Operator configuration

use crate::error::{OperatorError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_job_buffer_capacity() -> usize {
    10_000
}

fn default_stream_class_buffer_capacity() -> usize {
    1_000
}

fn default_dedup_capacity() -> usize {
    100_000
}

fn default_stream_class_cache_capacity() -> usize {
    100
}

fn default_restart_delay_seconds() -> u64 {
    30
}

fn default_field_manager() -> String {
    "arcane-operator".to_string()
}

/// Settings of the operator process.
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    /// Namespace to watch; all namespaces when unset
    #[serde(default)]
    pub namespace: Option<String>,

    /// Event buffer capacity of the job watch
    #[serde(default = "default_job_buffer_capacity")]
    pub job_buffer_capacity: usize,

    /// Event buffer capacity of the StreamClass watch
    #[serde(default = "default_stream_class_buffer_capacity")]
    pub stream_class_buffer_capacity: usize,

    /// Resources remembered by each event deduplicator
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    /// Maximum number of stream kinds the operator serves
    #[serde(default = "default_stream_class_cache_capacity")]
    pub stream_class_cache_capacity: usize,

    /// Delay before a terminated pipeline is started again
    #[serde(default = "default_restart_delay_seconds")]
    pub restart_delay_seconds: u64,

    /// Field manager recorded on every write
    #[serde(default = "default_field_manager")]
    pub field_manager: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            job_buffer_capacity: default_job_buffer_capacity(),
            stream_class_buffer_capacity: default_stream_class_buffer_capacity(),
            dedup_capacity: default_dedup_capacity(),
            stream_class_cache_capacity: default_stream_class_cache_capacity(),
            restart_delay_seconds: default_restart_delay_seconds(),
            field_manager: default_field_manager(),
        }
    }
}

impl OperatorConfig {
    /// Parses a YAML (or JSON) configuration document
    pub fn from_yaml(document: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(document)
            .map_err(|e| OperatorError::Configuration(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let capacities = [
            ("jobBufferCapacity", self.job_buffer_capacity),
            ("streamClassBufferCapacity", self.stream_class_buffer_capacity),
            ("dedupCapacity", self.dedup_capacity),
            ("streamClassCacheCapacity", self.stream_class_cache_capacity),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(OperatorError::Configuration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.field_manager.is_empty() {
            return Err(OperatorError::Configuration(
                "fieldManager must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let cfg = OperatorConfig::default();
        assert_eq!(cfg.namespace, None);
        assert_eq!(cfg.job_buffer_capacity, 10_000);
        assert_eq!(cfg.restart_delay(), Duration::from_secs(30));
        assert_eq!(cfg.field_manager, "arcane-operator");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_deserialize_empty() {
        let cfg = OperatorConfig::from_yaml("{}").unwrap();
        assert_eq!(cfg, OperatorConfig::default());
    }

    #[test]
    fn test_config_deserialize_partial() {
        let cfg = OperatorConfig::from_yaml(
            "namespace: streams\njobBufferCapacity: 50\nrestartDelaySeconds: 5\n",
        )
        .unwrap();
        assert_eq!(cfg.namespace.as_deref(), Some("streams"));
        assert_eq!(cfg.job_buffer_capacity, 50);
        assert_eq!(cfg.restart_delay(), Duration::from_secs(5));
        assert_eq!(cfg.dedup_capacity, 100_000);
    }

    #[test]
    fn test_config_rejects_zero_capacity() {
        let err = OperatorConfig::from_yaml("dedupCapacity: 0").unwrap_err();
        assert!(err.to_string().contains("dedupCapacity"));
    }

    #[test]
    fn test_config_rejects_malformed_document() {
        let err = OperatorConfig::from_yaml("jobBufferCapacity: lots").unwrap_err();
        assert!(matches!(err, OperatorError::Configuration(_)));
    }
}
