//! Labels, annotations and the shared state-annotation vocabulary.
//!
//! Both stream definitions and streaming jobs carry the same state annotation
//! key; its value is one of [`StreamState`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Annotation holding the state of a stream definition or streaming job
pub const STATE_ANNOTATION: &str = "arcane.dev/state";

/// Annotation holding the configuration checksum a job was started with
pub const CONFIGURATION_CHECKSUM_ANNOTATION: &str = "arcane.dev/configuration-checksum";

// Owner coordinates recorded on jobs so the owning definition can be found without a lookup
pub const API_GROUP_ANNOTATION: &str = "arcane.dev/api-group";
pub const API_VERSION_ANNOTATION: &str = "arcane.dev/api-version";
pub const API_PLURAL_ANNOTATION: &str = "arcane.dev/api-plural";

// Job labels
pub const STREAM_ID_LABEL: &str = "arcane.dev/stream-id";
pub const STREAM_KIND_LABEL: &str = "arcane.dev/stream-kind";
pub const BACKFILLING_LABEL: &str = "arcane.dev/backfilling";

/// Values of [`STATE_ANNOTATION`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Suspended,
    ReloadRequested,
    RestartRequested,
    Terminating,
    TerminateRequested,
    SchemaMismatch,
    CrashLoop,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Suspended => "suspended",
            StreamState::ReloadRequested => "reload-requested",
            StreamState::RestartRequested => "restart-requested",
            StreamState::Terminating => "terminating",
            StreamState::TerminateRequested => "terminate-requested",
            StreamState::SchemaMismatch => "schema-mismatch",
            StreamState::CrashLoop => "crash-loop",
        }
    }

    /// Job is already on its way out
    pub fn is_terminating(&self) -> bool {
        matches!(
            self,
            StreamState::Terminating | StreamState::TerminateRequested
        )
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "suspended" => Ok(StreamState::Suspended),
            "reload-requested" => Ok(StreamState::ReloadRequested),
            "restart-requested" => Ok(StreamState::RestartRequested),
            "terminating" => Ok(StreamState::Terminating),
            "terminate-requested" => Ok(StreamState::TerminateRequested),
            "schema-mismatch" => Ok(StreamState::SchemaMismatch),
            "crash-loop" => Ok(StreamState::CrashLoop),
            other => Err(format!("unknown stream state '{}'", other)),
        }
    }
}

/// Reads the state annotation from an annotation map.
///
/// Unknown values are treated as "no state" so a typo by the resource owner
/// cannot wedge the decision tables.
pub fn read_state(annotations: &BTreeMap<String, String>) -> Option<StreamState> {
    annotations
        .get(STATE_ANNOTATION)
        .and_then(|value| value.parse().ok())
}
