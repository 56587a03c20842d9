//! Snapshot Store
//!
//! Local JSON snapshots of source-environment objects, one file per object:
//! `{root}/{plural}/{name}_[{id}].json`. Objects are found by id, so a file
//! whose name part went stale is still picked up.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::domain::ports::{ObjectStore, StoreError, StoreResult};
use crate::domain::value_objects::ObjectRef;

pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn directory(&self, object: &ObjectRef) -> PathBuf {
        self.root.join(object.resource_type.plural())
    }

    /// Existing snapshot of `object`, whatever its name part
    fn find_existing(&self, object: &ObjectRef) -> Option<PathBuf> {
        let suffix = format!("_[{}].json", object.id);
        let exact = format!("[{}].json", object.id);
        fs::read_dir(self.directory(object))
            .ok()?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .find(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(&suffix) || n == exact)
            })
    }

    fn default_path(&self, object: &ObjectRef) -> PathBuf {
        self.directory(object)
            .join(format!("{}_[{}].json", sanitize(&object.name), object.id))
    }
}

impl ObjectStore for SnapshotStore {
    fn locate(&self, object: &ObjectRef) -> PathBuf {
        self.find_existing(object)
            .unwrap_or_else(|| self.default_path(object))
    }

    fn read_object(&self, object: &ObjectRef) -> StoreResult<Value> {
        let Some(path) = self.find_existing(object) else {
            return Err(StoreError::NotFound(self.default_path(object)));
        };
        let content = fs::read_to_string(&path).map_err(|e| StoreError::Io {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let data: Value = serde_json::from_str(&content).map_err(|e| StoreError::Invalid {
            path: path.clone(),
            message: e.to_string(),
        })?;
        if !data.is_object() {
            return Err(StoreError::Invalid {
                path,
                message: "expected a JSON object".to_string(),
            });
        }
        debug!(object = %object, path = %path.display(), "snapshot read");
        Ok(data)
    }

    fn write_object(&self, object: &ObjectRef, data: &Value) -> StoreResult<()> {
        let path = self.locate(object);
        let io_error = |e: std::io::Error| StoreError::Io {
            path: path.clone(),
            message: e.to_string(),
        };

        let dir = self.directory(object);
        fs::create_dir_all(&dir).map_err(io_error)?;

        let mut content = serde_json::to_string_pretty(data).map_err(|e| StoreError::Invalid {
            path: path.clone(),
            message: e.to_string(),
        })?;
        content.push('\n');

        let mut file = NamedTempFile::new_in(&dir).map_err(io_error)?;
        file.write_all(content.as_bytes()).map_err(io_error)?;
        file.persist(&path).map_err(|e| io_error(e.error))?;
        debug!(object = %object, path = %path.display(), "snapshot written");
        Ok(())
    }
}

/// File-name-safe form of an object name
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
