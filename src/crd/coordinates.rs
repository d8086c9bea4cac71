//! API coordinates of a custom resource type

use kube::api::ApiResource;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Group, version, plural and kind of a custom resource type.
///
/// Stream kinds are only known at runtime, so every access to a stream
/// definition goes through a set of coordinates read from its StreamClass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCoordinates {
    pub group: String,
    pub version: String,
    pub plural: String,
    pub kind: String,
}

impl ApiCoordinates {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        plural: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            plural: plural.into(),
            kind: kind.into(),
        }
    }

    /// `group/version`, or just `version` for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: self.kind.clone(),
            plural: self.plural.clone(),
        }
    }
}

impl fmt::Display for ApiCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.plural, self.group, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_resource_from_coordinates() {
        let coords = ApiCoordinates::new("arcane.dev", "v1", "sqlserverstreams", "SqlServerStream");
        let ar = coords.api_resource();
        assert_eq!(ar.api_version, "arcane.dev/v1");
        assert_eq!(ar.plural, "sqlserverstreams");
        assert_eq!(ar.kind, "SqlServerStream");
        assert_eq!(coords.to_string(), "sqlserverstreams.arcane.dev/v1");
    }

    #[test]
    fn test_core_group_api_version() {
        let coords = ApiCoordinates::new("", "v1", "configmaps", "ConfigMap");
        assert_eq!(coords.api_version(), "v1");
    }
}
