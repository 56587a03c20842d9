//! Repository implementations
//!
//! - `FileDeployStateRepository` - deploy state as one JSON document
//! - `YamlManifestRepository` - the release manifest

mod deploy_state;
mod manifest;

pub use deploy_state::FileDeployStateRepository;
pub use manifest::YamlManifestRepository;
