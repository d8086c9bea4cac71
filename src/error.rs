//! Error types for the Arcane stream operator

use thiserror::Error;

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors that can occur during operator operations
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A referenced object (stream class, job template) does not exist
    #[error("Missing reference: {0}")]
    MissingReference(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource not found
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Invalid resource state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A bounded event buffer rejected an event
    #[error("Event buffer overflow: capacity {capacity} exceeded for {source_name}")]
    BufferOverflow { source_name: String, capacity: usize },

    /// The watched resource type itself no longer exists
    #[error("Watch target missing: {0}")]
    WatchTargetMissing(String),

    /// The consumer side of an event subscription went away
    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),
}

impl OperatorError {
    /// Whether this error must terminate the pipeline that observed it.
    ///
    /// Everything else is logged and the pipeline moves on to the next event.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OperatorError::BufferOverflow { .. }
                | OperatorError::WatchTargetMissing(_)
                | OperatorError::SubscriptionClosed(_)
        )
    }

    /// HTTP status code of the underlying API error, if any
    pub fn api_code(&self) -> Option<u16> {
        match self {
            OperatorError::KubeApi(kube::Error::Api(response)) => Some(response.code),
            _ => None,
        }
    }

    /// Whether the API reported 404 for the request
    pub fn is_not_found(&self) -> bool {
        matches!(self, OperatorError::NotFound { .. }) || self.api_code() == Some(404)
    }

    /// Whether the API reported 409 for the request
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }
}
