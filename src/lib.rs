//! Ferry - configuration release engine
//!
//! Ferry releases a tree of remote API resources (workspaces, queues with
//! their schemas and inboxes, hooks, labels, engines, ...) from locally
//! stored snapshots of a source environment into one or more target
//! environments. It rewrites cross-object references, detects drift against
//! the last applied state, and deploys in two passes with per-object failure
//! isolation.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod presentation;

// Re-exports for convenience
pub use application::{PlanAction, ReleaseConfig, ReleasePlan, ReleaseResult, ReleaseUseCase};
pub use config::FerryConfig;
pub use domain::entities::{DeployState, Manifest, ReleaseObject};
pub use domain::value_objects::{Direction, ObjectId, ObjectRef, Phase, ResourceType};
pub use error::{FerryError, FerryResult};
