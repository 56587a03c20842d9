//! ManifestRepository port - persistence of the release manifest
//!
//! The orchestrator writes created target ids back into the manifest and
//! re-saves it, so an interrupted run can be resumed.

use crate::domain::entities::Manifest;

pub type ManifestResult<T> = Result<T, ManifestError>;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest not found: {0}")]
    NotFound(String),
    #[error("invalid manifest format: {0}")]
    InvalidFormat(String),
    #[error("manifest I/O error: {0}")]
    Io(String),
}

pub trait ManifestRepository: Send + Sync {
    fn load(&self) -> ManifestResult<Manifest>;

    fn save(&self, manifest: &Manifest) -> ManifestResult<()>;
}
