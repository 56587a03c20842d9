//! ObjectStore port - local JSON snapshots of source-environment resources
//!
//! How an object maps onto a file is the store's concern; the engine only
//! knows an object's identity.

use std::path::PathBuf;

use serde_json::Value;

use crate::domain::value_objects::ObjectRef;

/// Result type for snapshot store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Snapshot store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("snapshot not found: {0}")]
    NotFound(PathBuf),
    #[error("invalid snapshot {path}: {message}")]
    Invalid { path: PathBuf, message: String },
    #[error("I/O error on {path}: {message}")]
    Io { path: PathBuf, message: String },
}

/// Abstract access to local resource snapshots
pub trait ObjectStore: Send + Sync {
    /// Where the snapshot of `object` lives (used in error messages)
    fn locate(&self, object: &ObjectRef) -> PathBuf;

    fn read_object(&self, object: &ObjectRef) -> StoreResult<Value>;

    fn write_object(&self, object: &ObjectRef, data: &Value) -> StoreResult<()>;
}
