//! Configuration type definitions

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::ReleaseConfig;
use crate::domain::value_objects::ResourceType;

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("invalid config {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Non-fatal configuration warning surfaced to CLI users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub key: String,
    pub file: PathBuf,
    pub line: Option<usize>,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown config key '{}' in {}", self.key, self.file.display())?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (did you mean '{suggestion}'?)")?;
        }
        Ok(())
    }
}

/// Remote API endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the environment the snapshots were taken from
    pub source_base_url: String,
    /// Base URL of the environment being released to
    pub target_base_url: String,
    /// Name of the environment variable holding the API token
    pub token_env: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            source_base_url: String::new(),
            target_base_url: String::new(),
            token_env: "FERRY_TOKEN".to_string(),
            timeout_secs: 60,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The token, read from the configured environment variable
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|token| !token.is_empty())
    }
}

/// `[release]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseSection {
    pub concurrency: usize,
    pub compare: bool,
    pub cross_org: bool,
    pub queue_delete_poll_interval_ms: u64,
    pub queue_delete_max_attempts: u32,
    /// Answer every prompt with yes
    pub auto_approve: bool,
}

impl Default for ReleaseSection {
    fn default() -> Self {
        Self {
            concurrency: 10,
            compare: true,
            cross_org: false,
            queue_delete_poll_interval_ms: 2000,
            queue_delete_max_attempts: 30,
            auto_approve: false,
        }
    }
}

/// Fields per resource type, keyed by plural name (`queues = ["counts"]`)
pub type FieldTable = BTreeMap<String, Vec<String>>;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    pub api: ApiConfig,
    pub release: ReleaseSection,
    pub ignored_attributes: FieldTable,
    pub cross_org_ignored_attributes: FieldTable,
    pub derived_fields: FieldTable,
}

impl FerryConfig {
    /// The explicit settings value handed to the release use case
    pub fn to_release_config(&self) -> Result<ReleaseConfig, ConfigError> {
        if self.release.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "release.concurrency must be at least 1".to_string(),
            ));
        }

        let mut config = ReleaseConfig::new()
            .with_concurrency(self.release.concurrency)
            .with_compare(self.release.compare)
            .with_cross_org(self.release.cross_org)
            .with_source_base_url(self.api.source_base_url.trim_end_matches('/'))
            .with_queue_delete_polling(
                Duration::from_millis(self.release.queue_delete_poll_interval_ms),
                self.release.queue_delete_max_attempts,
            );
        config.ignored_attributes = by_type("ignored_attributes", &self.ignored_attributes)?;
        config.cross_org_ignored_attributes =
            by_type("cross_org_ignored_attributes", &self.cross_org_ignored_attributes)?;
        config.derived_fields = by_type("derived_fields", &self.derived_fields)?;
        Ok(config)
    }
}

fn by_type(
    section: &str,
    table: &FieldTable,
) -> Result<HashMap<ResourceType, Vec<String>>, ConfigError> {
    table
        .iter()
        .map(|(plural, fields)| {
            ResourceType::from_plural(plural)
                .map(|ty| (ty, fields.clone()))
                .ok_or_else(|| {
                    ConfigError::Invalid(format!("[{section}]: unknown resource type '{plural}'"))
                })
        })
        .collect()
}
