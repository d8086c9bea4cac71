//! SqlServerStream Custom Resource Definition
//!
//! A typed stream kind: change tracking from a SQL Server table. Registered
//! with the operator through a StreamClass like any other kind; the typed
//! model exists for CRD generation and as a reference implementation of
//! [`StreamDefinition`].

use crate::crd::{JobTemplateRef, StreamDefinition, StreamStatus};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// SqlServerStream is the Schema for the sqlserverstreams API
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "arcane.dev",
    version = "v1",
    kind = "SqlServerStream",
    namespaced,
    status = "StreamStatus",
    shortname = "sqls",
    printcolumn = r#"{"name":"Table","type":"string","jsonPath":".spec.table"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SqlServerStreamSpec {
    /// Secret holding the connection string
    pub connection_secret_ref: SecretRef,

    /// Source schema
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Source table
    pub table: String,

    /// Sink location, e.g. an object storage prefix
    pub sink_location: String,

    /// Rows fetched per change-tracking poll
    #[serde(default = "default_rows_per_group")]
    pub rows_per_group: i32,

    /// Poll interval in seconds
    #[serde(default = "default_change_capture_interval_seconds")]
    pub change_capture_interval_seconds: i32,

    /// Template for the streaming job
    pub job_template_ref: JobTemplateRef,

    /// Template for the backfill job
    pub backfill_job_template_ref: JobTemplateRef,
}

/// Reference to a secret in the stream's namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SecretRef {
    pub name: String,
}

impl StreamDefinition for SqlServerStream {
    fn stream_id(&self) -> String {
        self.name_any()
    }

    fn stream_namespace(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }

    fn stream_kind(&self) -> String {
        "SqlServerStream".to_string()
    }

    fn annotations_map(&self) -> BTreeMap<String, String> {
        self.annotations().clone()
    }

    fn spec_payload(&self) -> Value {
        serde_json::to_value(&self.spec).unwrap_or(Value::Null)
    }

    fn job_template_ref(&self, is_backfilling: bool) -> Option<JobTemplateRef> {
        if is_backfilling {
            Some(self.spec.backfill_job_template_ref.clone())
        } else {
            Some(self.spec.job_template_ref.clone())
        }
    }
}

fn default_schema() -> String {
    "dbo".to_string()
}

fn default_rows_per_group() -> i32 {
    10_000
}

fn default_change_capture_interval_seconds() -> i32 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::stream_definition::tests::stream;
    use serde_json::json;

    fn spec_json() -> Value {
        json!({
            "connectionSecretRef": {"name": "sql-credentials"},
            "table": "orders",
            "sinkLocation": "s3://lake/orders",
            "jobTemplateRef": {"name": "standard"},
            "backfillJobTemplateRef": {"name": "large"},
        })
    }

    #[test]
    fn test_spec_defaults() {
        let spec: SqlServerStreamSpec = serde_json::from_value(spec_json()).unwrap();
        assert_eq!(spec.schema, "dbo");
        assert_eq!(spec.rows_per_group, 10_000);
        assert_eq!(spec.change_capture_interval_seconds, 15);
    }

    #[test]
    fn test_typed_and_dynamic_views_agree() {
        let spec: SqlServerStreamSpec = serde_json::from_value(spec_json()).unwrap();
        let typed = SqlServerStream::new("orders", spec);

        // The dynamic view sees the defaulted payload as stored by the API server
        let dynamic = stream("orders", serde_json::to_value(&typed.spec).unwrap(), None);

        assert_eq!(typed.configuration_checksum(), dynamic.configuration_checksum());
        assert_eq!(typed.job_template_ref(true), dynamic.job_template_ref(true));
        assert_eq!(typed.job_template_ref(false), dynamic.job_template_ref(false));
    }
}
