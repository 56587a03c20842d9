//! JSON Deploy State Repository
//!
//! Implements the DeployStateRepository port as one JSON document, keyed by
//! resource type (plural name), source id and target id. Saves hold an
//! exclusive lock and replace the file atomically.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::warn;

use crate::domain::entities::{DeployState, DeploymentEntry, LastApplied};
use crate::domain::ports::{DeployStateRepository, StateError, StateResult};
use crate::domain::value_objects::{ObjectId, ResourceType};

const STATE_VERSION: u32 = 1;

/// JSON representation of one deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JsonDeployment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_applied: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_applied_reverse: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    derived_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deployed_at: Option<DateTime<Utc>>,
}

/// plural -> source id -> target id -> deployment
type JsonResources = BTreeMap<String, BTreeMap<ObjectId, BTreeMap<ObjectId, JsonDeployment>>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JsonDeployState {
    version: u32,
    #[serde(default)]
    resources: JsonResources,
}

pub struct FileDeployStateRepository {
    path: PathBuf,
}

impl FileDeployStateRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn write_atomic(&self, content: &str) -> StateResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| StateError::Io(e.to_string()))?;
        let mut file = NamedTempFile::new_in(&dir).map_err(|e| StateError::Io(e.to_string()))?;
        file.write_all(content.as_bytes())
            .map_err(|e| StateError::Io(e.to_string()))?;
        file.persist(&self.path)
            .map_err(|e| StateError::Io(e.error.to_string()))?;
        Ok(())
    }
}

impl DeployStateRepository for FileDeployStateRepository {
    fn load(&self) -> StateResult<DeployState> {
        if !self.path.exists() {
            return Ok(DeployState::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| StateError::Io(e.to_string()))?;
        if content.trim().is_empty() {
            return Ok(DeployState::new());
        }
        let document: JsonDeployState = serde_json::from_str(&content)
            .map_err(|e| StateError::InvalidFormat(format!("{}: {e}", self.path.display())))?;
        if document.version != STATE_VERSION {
            return Err(StateError::InvalidFormat(format!(
                "unsupported deploy state version {} (expected {STATE_VERSION})",
                document.version
            )));
        }
        from_json(document.resources)
    }

    fn save(&self, state: &DeployState) -> StateResult<()> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StateError::Io(e.to_string()))?;
        }
        let lock_file = fs::File::create(&lock_path).map_err(|e| StateError::Io(e.to_string()))?;
        lock_file
            .lock_exclusive()
            .map_err(|e| StateError::Io(e.to_string()))?;

        let document = JsonDeployState {
            version: STATE_VERSION,
            resources: to_json(state),
        };
        let result = serde_json::to_string_pretty(&document)
            .map_err(|e| StateError::InvalidFormat(e.to_string()))
            .and_then(|content| self.write_atomic(&(content + "\n")));

        if let Err(e) = lock_file.unlock() {
            warn!(path = %lock_path.display(), error = %e, "failed to release deploy state lock");
        }
        result
    }
}

fn from_json(resources: JsonResources) -> StateResult<DeployState> {
    let mut state = DeployState::new();
    for (plural, sources) in resources {
        let resource_type = ResourceType::from_plural(&plural).ok_or_else(|| {
            StateError::InvalidFormat(format!("unknown resource type '{plural}'"))
        })?;
        for (source_id, targets) in sources {
            for (target_id, deployment) in targets {
                state.set_entry(
                    resource_type,
                    source_id,
                    target_id,
                    DeploymentEntry {
                        last_applied: LastApplied {
                            forward: deployment.last_applied,
                            reverse: deployment.last_applied_reverse,
                            derived_fields: deployment.derived_fields,
                        },
                        deployed_at: deployment.deployed_at,
                    },
                );
            }
        }
    }
    Ok(state)
}

fn to_json(state: &DeployState) -> JsonResources {
    let mut resources = JsonResources::new();
    for (resource_type, bucket) in state.buckets() {
        let sources = resources
            .entry(resource_type.plural().to_string())
            .or_default();
        for (source_id, deployments) in bucket {
            let targets = sources.entry(*source_id).or_default();
            for (target_id, entry) in &deployments.deployments {
                targets.insert(
                    *target_id,
                    JsonDeployment {
                        last_applied: entry.last_applied.forward.clone(),
                        last_applied_reverse: entry.last_applied.reverse.clone(),
                        derived_fields: entry.last_applied.derived_fields.clone(),
                        deployed_at: entry.deployed_at,
                    },
                );
            }
        }
    }
    resources
}
