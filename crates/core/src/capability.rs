//! Decide whether this watcher can satisfy a step's desired provenance.

use std::collections::HashSet;

use crate::types::{OperationKind, ProvenanceSpec};
use crate::wildcard::wildcard_match;

/// Default application name reported by the watcher.
pub const DEFAULT_APPLICATION: &str = "3D Slicer";

/// Default application version reported by the watcher.
pub const DEFAULT_VERSION: &str = "4.3.1";

/// Application name and version this watcher presents as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub application: String,
    pub version: String,
}

impl AppIdentity {
    pub fn new(application: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            version: version.into(),
        }
    }
}

impl Default for AppIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_APPLICATION, DEFAULT_VERSION)
    }
}

/// True iff the application pattern matches, the version pattern matches,
/// and the operation is one of `operations`. All three must hold.
pub fn can_perform_step(
    provenance: &ProvenanceSpec,
    identity: &AppIdentity,
    operations: &HashSet<OperationKind>,
) -> bool {
    let application_match = wildcard_match(&provenance.application, &identity.application);
    let version_match = wildcard_match(&provenance.version, &identity.version);
    let operation_match = provenance
        .operation
        .parse::<OperationKind>()
        .map(|kind| operations.contains(&kind))
        .unwrap_or(false);

    application_match && version_match && operation_match
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn provenance(application: &str, version: &str, operation: &str) -> ProvenanceSpec {
        ProvenanceSpec {
            application: application.into(),
            version: version.into(),
            operation: operation.into(),
            extra: Map::new(),
        }
    }

    fn load_only() -> HashSet<OperationKind> {
        HashSet::from([OperationKind::Load])
    }

    #[test]
    fn pattern_truth_table() {
        // (application pattern, version pattern, application, version, expected)
        let table = [
            ("3D Slicer", "3D Slicer", "3D Slicer", "4.3.1", false),
            ("3D Slicer", "*", "3D Slicer", "4.3.1", true),
            ("3D Slicer", "*", "3D Slicer", "5.0.0", true),
            ("3D Slicer", "4.*", "3D Slicer", "4.3.1", true),
            ("3D Slicer", "4.*", "3D Slicer", "5.0.0", false),
            ("*", "*", "3D Slicer", "5.0.0", true),
            ("*", "4.*", "3D Slicer", "4.3.1", true),
            ("*", "4.*", "3D Slicer", "5.0.0", false),
            ("*", "3D Slicer", "3D Slicer", "4.3.1", false),
            ("4.*", "*", "3D Slicer", "4.3.1", false),
            ("4.*", "4.*", "3D Slicer", "4.3.1", false),
            ("3D Slicer", "*", "OsiriX", "4.3.1", false),
            ("3D Slicer", "4.*", "OsiriX", "4.3.1", false),
            ("*", "*", "OsiriX", "5.0.0", true),
            ("3D*", "4.?.1", "3D Slicer", "4.3.1", true),
        ];

        for (app_pattern, version_pattern, application, version, expected) in table {
            assert_eq!(
                can_perform_step(
                    &provenance(app_pattern, version_pattern, "Load"),
                    &AppIdentity::new(application, version),
                    &load_only()
                ),
                expected,
                "app={app_pattern} version={version_pattern} against {application} {version}"
            );
        }
    }

    #[test]
    fn version_star_pattern() {
        let ops = load_only();
        assert!(can_perform_step(
            &provenance("3D Slicer", "4.*", "Load"),
            &AppIdentity::new("3D Slicer", "4.3.1"),
            &ops
        ));
        assert!(!can_perform_step(
            &provenance("3D Slicer", "4.*", "Load"),
            &AppIdentity::new("3D Slicer", "5.0.0"),
            &ops
        ));
    }

    #[test]
    fn application_mismatch_fails() {
        assert!(!can_perform_step(
            &provenance("OsiriX", "*", "Load"),
            &AppIdentity::default(),
            &load_only()
        ));
    }

    #[test]
    fn unregistered_operation_fails() {
        assert!(!can_perform_step(
            &provenance("*", "*", "Segment"),
            &AppIdentity::default(),
            &load_only()
        ));
    }

    #[test]
    fn unknown_operation_name_fails() {
        assert!(!can_perform_step(
            &provenance("*", "*", "Teleport"),
            &AppIdentity::default(),
            &HashSet::from(OperationKind::ALL)
        ));
    }

    #[test]
    fn empty_table_never_matches() {
        assert!(!can_perform_step(
            &provenance("*", "*", "Load"),
            &AppIdentity::default(),
            &HashSet::new()
        ));
    }
}
