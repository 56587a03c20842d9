//! Domain Entities
//!
//! Core domain entities that have identity and lifecycle.
//! - `ReleaseObject` / `Target` - A source resource and its destinations
//! - `Manifest` - Declarative list of what to release where
//! - `DeployState` - Last applied configuration per deployment

mod deploy_state;
mod manifest;
mod release_object;

pub use deploy_state::{
    state_key, DeployState, DeploymentEntry, LastApplied, ResourceDeployments,
};
pub use manifest::{
    collect_target_ids, EngineEntry, Manifest, ManifestEntry, ManifestTarget, QueueEntry,
    TargetIds,
};
pub use release_object::{ReleaseObject, Target};
