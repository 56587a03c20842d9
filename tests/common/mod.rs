//! Common test utilities for Ferry scenario tests.
//!
//! - `ReleaseDir`: isolated release directory (manifest, snapshots, state)
//! - Fixtures: source snapshots of typical objects

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use ferry::domain::ports::{AutoApprove, ObjectStore};
use ferry::infrastructure::{
    FileDeployStateRepository, HttpApiClient, SnapshotStore, YamlManifestRepository,
};
use ferry::{ObjectRef, ReleaseConfig, ReleaseUseCase, ResourceType};

pub const SOURCE: &str = "https://source.example.com/api/v1";

pub type FileUseCase =
    ReleaseUseCase<SnapshotStore, FileDeployStateRepository, YamlManifestRepository>;

/// A release directory laid out like a real project
pub struct ReleaseDir {
    pub dir: TempDir,
}

impl ReleaseDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.path().join("release.yaml")
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.path().join(".ferry").join("deploy_state.json")
    }

    pub fn snapshots(&self) -> SnapshotStore {
        SnapshotStore::new(self.dir.path().join("source"))
    }

    pub fn write_manifest(&self, yaml: &str) {
        std::fs::write(self.manifest_path(), yaml).unwrap();
    }

    pub fn write_snapshot(&self, resource_type: ResourceType, data: Value) {
        let object = ObjectRef::new(
            resource_type,
            data["id"].as_i64().unwrap(),
            data["name"].as_str().unwrap_or_default(),
        );
        self.snapshots().write_object(&object, &data).unwrap();
    }

    pub fn state_json(&self) -> Value {
        serde_json::from_str(&std::fs::read_to_string(self.state_path()).unwrap()).unwrap()
    }

    /// Use case against the API at `target_base_url`, approving every prompt
    pub fn use_case(&self, target_base_url: &str) -> FileUseCase {
        let api = HttpApiClient::new(target_base_url, "test-token").unwrap();
        let config = ReleaseConfig::new()
            .with_concurrency(2)
            .with_source_base_url(SOURCE)
            .with_queue_delete_polling(Duration::from_millis(1), 3);
        ReleaseUseCase::new(
            self.snapshots(),
            FileDeployStateRepository::new(self.state_path()),
            YamlManifestRepository::new(self.manifest_path()),
            Arc::new(api),
            config,
        )
        .with_prompt(Arc::new(AutoApprove))
    }
}

pub fn source_url(resource_type: ResourceType, id: i64) -> String {
    ferry::domain::value_objects::reference_url(SOURCE, resource_type, id)
}

/// Source snapshot of a hook
pub fn hook(id: i64, name: &str, run_after: &[i64]) -> Value {
    let run_after: Vec<String> = run_after
        .iter()
        .map(|p| source_url(ResourceType::Hook, *p))
        .collect();
    json!({
        "id": id,
        "url": source_url(ResourceType::Hook, id),
        "name": name,
        "type": "webhook",
        "active": true,
        "events": ["annotation_content.initialize"],
        "queues": [],
        "run_after": run_after,
        "config": {"url": format!("https://hooks.example.com/{}", name.to_lowercase())}
    })
}

pub const TWO_HOOKS_MANIFEST: &str = r#"
hooks:
  - id: 1
    name: Validate
    targets:
      - id: null
  - id: 2
    name: Export
    targets:
      - id: null
"#;
