//! Domain Ports (Interfaces)
//!
//! These traits define the boundaries of the domain layer.
//! Infrastructure layer provides concrete implementations.

pub mod deploy_events;
pub mod deploy_state_repository;
pub mod manifest_repository;
pub mod object_store;
pub mod prompt;
pub mod remote_api;

pub use deploy_events::{NoopEventSink, ReleaseEvent, ReleaseEventSink};
pub use deploy_state_repository::{DeployStateRepository, StateError, StateResult};
pub use manifest_repository::{ManifestError, ManifestRepository, ManifestResult};
pub use object_store::{ObjectStore, StoreError, StoreResult};
pub use prompt::{AutoApprove, AutoDecline, Prompt};
pub use remote_api::{ApiError, ApiResult, Method, RemoteApi};
