//! Infrastructure Layer
//!
//! Concrete implementations of domain ports.
//! This layer handles all I/O operations.
//!
//! ## Structure
//!
//! - `api/` - HTTP client for the remote API
//! - `store/` - Local snapshot files of source objects
//! - `repositories/` - Deploy state and manifest persistence
//! - `prompt/` - Terminal prompts
//! - `events/` - Event sinks (NDJSON)

pub mod api;
pub mod events;
pub mod prompt;
pub mod repositories;
pub mod store;

pub use api::HttpApiClient;
pub use events::JsonEventSink;
pub use prompt::InteractivePrompt;
pub use repositories::{FileDeployStateRepository, YamlManifestRepository};
pub use store::SnapshotStore;
