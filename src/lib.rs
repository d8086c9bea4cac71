//! Arcane Stream Operator
//!
//! A Kubernetes operator that turns stream definitions into streaming jobs.
//! Stream kinds are not compiled in: each `StreamClass` registers the CRD
//! coordinates of one kind, and the operator attaches a reconciliation
//! pipeline to it at runtime.
//!
//! ## Custom Resources
//!
//! - `StreamClass`: registers a stream kind
//! - `StreamingJobTemplate`: the job template a stream definition references
//! - Stream definitions: documents of any registered kind, e.g. `SqlServerStream`
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: arcane.dev/v1
//! kind: StreamClass
//! metadata:
//!   name: sqlserver
//!   namespace: streams
//! spec:
//!   apiGroupRef: arcane.dev
//!   apiVersion: v1
//!   kindRef: SqlServerStream
//!   pluralName: sqlserverstreams
//!   secretRefFields:
//!     - connectionSecretRef
//! ```

pub mod accessors;
pub mod annotations;
pub mod cache;
pub mod commands;
pub mod conditions;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod dedup;
pub mod error;
pub mod events;
pub mod jobs;
pub mod operator;

pub use commands::Command;
pub use config::OperatorConfig;
pub use controllers::{CommandHandler, JobEventReconciler, KindSupervisor, StreamReconciler};
pub use crd::{
    DynamicStream, SqlServerStream, StreamClass, StreamClassPhase, StreamPhase, StreamStatus,
    StreamingJobTemplate,
};
pub use error::{OperatorError, Result};
pub use operator::Operator;
