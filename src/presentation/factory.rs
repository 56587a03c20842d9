//! Use Case Factory
//!
//! Creates use cases with infrastructure dependencies wired up.
//! This is the dependency injection point for the application.

use std::path::PathBuf;
use std::sync::Arc;

use crate::application::ReleaseUseCase;
use crate::config::{ConfigError, FerryConfig};
use crate::domain::ports::{AutoApprove, NoopEventSink, Prompt, ReleaseEventSink};
use crate::error::FerryResult;
use crate::infrastructure::{
    FileDeployStateRepository, HttpApiClient, InteractivePrompt, JsonEventSink, SnapshotStore,
    YamlManifestRepository,
};

/// Type alias for the concrete ReleaseUseCase with all dependencies
pub type ConcreteReleaseUseCase =
    ReleaseUseCase<SnapshotStore, FileDeployStateRepository, YamlManifestRepository>;

/// Where a release reads and writes its local files
#[derive(Debug, Clone)]
pub struct ReleasePaths {
    pub manifest: PathBuf,
    /// Root of the local source snapshots
    pub snapshots: PathBuf,
    pub state: PathBuf,
}

impl ReleasePaths {
    /// Snapshots next to the manifest, state in `.ferry/deploy_state.json`
    pub fn beside(manifest: impl Into<PathBuf>) -> Self {
        let manifest = manifest.into();
        let root = manifest
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            snapshots: root.clone(),
            state: root.join(".ferry").join("deploy_state.json"),
            manifest,
        }
    }
}

/// Runtime switches coming from the command line
#[derive(Debug, Clone, Copy, Default)]
pub struct RunMode {
    /// Answer every prompt with yes
    pub auto_approve: bool,
    /// Emit NDJSON release events on stdout
    pub json_events: bool,
}

/// Create a release use case with all dependencies wired up
pub fn create_release_use_case(
    config: &FerryConfig,
    paths: &ReleasePaths,
    mode: RunMode,
) -> FerryResult<ConcreteReleaseUseCase> {
    let target = config.api.target_base_url.trim();
    if target.is_empty() {
        return Err(ConfigError::Invalid(
            "api.target_base_url is not set (config file or FERRY_TARGET_BASE_URL)".to_string(),
        )
        .into());
    }
    let token = config.api.token().ok_or_else(|| {
        ConfigError::Invalid(format!("API token missing: set {}", config.api.token_env))
    })?;
    let api = HttpApiClient::with_timeout(target, token, config.api.timeout())
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    let prompt: Arc<dyn Prompt> = if mode.auto_approve || config.release.auto_approve {
        Arc::new(AutoApprove)
    } else {
        Arc::new(InteractivePrompt::new())
    };
    let events: Arc<dyn ReleaseEventSink> = if mode.json_events {
        Arc::new(JsonEventSink::stdout())
    } else {
        Arc::new(NoopEventSink)
    };

    Ok(ReleaseUseCase::new(
        SnapshotStore::new(&paths.snapshots),
        FileDeployStateRepository::new(&paths.state),
        YamlManifestRepository::new(&paths.manifest),
        Arc::new(api),
        config.to_release_config()?,
    )
    .with_prompt(prompt)
    .with_events(events))
}
