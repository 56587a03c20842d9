//! YAML Manifest Repository
//!
//! Implements the ManifestRepository port. Target ids written back by a
//! release are persisted immediately so an interrupted run can resume.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::domain::entities::Manifest;
use crate::domain::ports::{ManifestError, ManifestRepository, ManifestResult};

pub struct YamlManifestRepository {
    path: PathBuf,
}

impl YamlManifestRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ManifestRepository for YamlManifestRepository {
    fn load(&self) -> ManifestResult<Manifest> {
        if !self.path.exists() {
            return Err(ManifestError::NotFound(self.path.display().to_string()));
        }
        let content =
            fs::read_to_string(&self.path).map_err(|e| ManifestError::Io(e.to_string()))?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| ManifestError::InvalidFormat(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, manifest: &Manifest) -> ManifestResult<()> {
        let content = serde_yaml_ng::to_string(manifest)
            .map_err(|e| ManifestError::InvalidFormat(e.to_string()))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| ManifestError::Io(e.to_string()))?;
        let mut file = NamedTempFile::new_in(&dir).map_err(|e| ManifestError::Io(e.to_string()))?;
        file.write_all(content.as_bytes())
            .map_err(|e| ManifestError::Io(e.to_string()))?;
        file.persist(&self.path)
            .map_err(|e| ManifestError::Io(e.error.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{ManifestEntry, ManifestTarget, QueueEntry};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    const MANIFEST: &str = r#"
organization:
  id: 1
  name: Acme
  targets:
    - id: 2
workspaces:
  - id: 3
    name: Finance
    targets:
      - id: null
        attribute_override:
          name: Finance (prod)
queues:
  - id: 10
    name: Invoices
    targets:
      - {}
    schema:
      id: 20
      name: Invoices schema
      targets:
        - {}
"#;

    #[test]
    fn load_parses_nested_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("release.yaml");
        fs::write(&path, MANIFEST).unwrap();

        let manifest = YamlManifestRepository::new(&path).load().unwrap();
        assert_eq!(manifest.organization.as_ref().map(|o| o.id), Some(1));
        assert_eq!(manifest.workspaces[0].targets[0].id, None);
        assert_eq!(
            manifest.workspaces[0].targets[0].attribute_override["name"],
            serde_json::json!("Finance (prod)")
        );
        assert_eq!(manifest.queues[0].schema.id, 20);
    }

    #[test]
    fn missing_manifest_is_not_found() {
        let err = YamlManifestRepository::new("/nonexistent/release.yaml")
            .load()
            .unwrap_err();
        assert!(matches!(err, ManifestError::NotFound(_)));
    }

    #[test]
    fn save_keeps_written_back_ids() {
        let dir = tempdir().unwrap();
        let repo = YamlManifestRepository::new(dir.path().join("release.yaml"));
        let manifest = Manifest {
            queues: vec![QueueEntry {
                entry: ManifestEntry::new(10, "Invoices", vec![ManifestTarget::new(Some(100))]),
                schema: ManifestEntry::new(20, "Schema", vec![ManifestTarget::new(Some(200))]),
                ..QueueEntry::default()
            }],
            ..Manifest::default()
        };

        repo.save(&manifest).unwrap();
        assert_eq!(repo.load().unwrap(), manifest);
    }
}
