//! Error types for Ferry
//!
//! Uses `thiserror` for library errors. Per-object errors are caught at the
//! object boundary and turned into failure flags; `PhaseFailed` is the single
//! aggregate raised at a phase boundary.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::ports::{ApiError, ManifestError, StateError, StoreError};
use crate::domain::value_objects::{ObjectFailure, ObjectId, ObjectRef, Phase, ResourceType};

/// Result type alias for Ferry operations
pub type FerryResult<T> = Result<T, FerryError>;

/// Main error type for Ferry operations
#[derive(Error, Debug)]
pub enum FerryError {
    /// Local snapshot missing or renamed
    #[error("local snapshot for {object} not found at {path}")]
    PathNotFound { object: ObjectRef, path: PathBuf },

    /// A required reference has no target mapping and no fallback policy
    #[error("{object}: cannot resolve '{field}' ({expected} {dependency_id}): {reason}")]
    DependencyUnresolved {
        object: ObjectRef,
        field: String,
        expected: ResourceType,
        dependency_id: ObjectId,
        reason: String,
    },

    /// Remote object changed after the last deploy and the operator declined to overwrite
    #[error("{object}: target {target_id} was modified at {remote_modified_at}, after the last deploy at {deployed_at}")]
    TimestampMismatch {
        object: ObjectRef,
        target_id: ObjectId,
        remote_modified_at: String,
        deployed_at: String,
    },

    /// One or more required children failed
    #[error("{object}: {} sub-object(s) failed: {}", .failures.len(), join(.failures))]
    SubObjectFailure {
        object: ObjectRef,
        failures: Vec<ObjectRef>,
    },

    /// Three-way merge found incompatible divergence
    #[error("{object}: unresolved conflicts at {}", .paths.join(", "))]
    Conflict { object: ObjectRef, paths: Vec<String> },

    /// Remote API failure for a specific object
    #[error("{object}: {error}")]
    RemoteApi {
        object: ObjectRef,
        #[source]
        error: ApiError,
    },

    #[error("invalid path query '{query}': {message}")]
    InvalidQuery { query: String, message: String },

    #[error("invalid attribute override '{path}': {message}")]
    InvalidOverride { path: String, message: String },

    /// Composite children must share the parent's target count
    #[error("{child} has {found} target(s) but its owner {object} has {expected}")]
    Cardinality {
        object: ObjectRef,
        child: ObjectRef,
        expected: usize,
        found: usize,
    },

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Aggregate raised at a phase boundary
    #[error("phase '{phase}' failed for {} object(s):\n{}", .failures.len(), join(.failures))]
    PhaseFailed {
        phase: Phase,
        failures: Vec<ObjectFailure>,
    },

    #[error("release aborted by operator")]
    Aborted,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FerryError {
    pub fn remote(object: &ObjectRef, error: ApiError) -> Self {
        FerryError::RemoteApi {
            object: object.clone(),
            error,
        }
    }

    /// True when the underlying remote error is a 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, FerryError::RemoteApi { error, .. } if error.is_not_found())
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_dependency_unresolved() {
        let err = FerryError::DependencyUnresolved {
            object: ObjectRef::new(ResourceType::Queue, 10, "Invoices"),
            field: "workspace".to_string(),
            expected: ResourceType::Workspace,
            dependency_id: 3,
            reason: "not part of the release".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "queue 'Invoices' [10]: cannot resolve 'workspace' (workspace 3): not part of the release"
        );
    }

    #[test]
    fn test_error_display_phase_failed_lists_objects() {
        let err = FerryError::PhaseFailed {
            phase: Phase::FirstDeploy,
            failures: vec![
                ObjectFailure::new(ObjectRef::new(ResourceType::Hook, 1, "a"), "boom"),
                ObjectFailure::new(ObjectRef::new(ResourceType::Hook, 2, "b"), "bang"),
            ],
        };
        let text = err.to_string();
        assert!(text.starts_with("phase 'deploy (first pass)' failed for 2 object(s)"));
        assert!(text.contains("hook 'a' [1]: boom"));
        assert!(text.contains("hook 'b' [2]: bang"));
    }

    #[test]
    fn test_not_found_detection() {
        let err = FerryError::remote(
            &ObjectRef::new(ResourceType::Queue, 1, "q"),
            ApiError::status(404, "gone"),
        );
        assert!(err.is_not_found());
    }
}
