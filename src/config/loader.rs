//! Configuration loading

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::{ConfigError, ConfigWarning, FerryConfig};

pub const CONFIG_FILE_NAME: &str = "ferry.toml";

/// Load configuration and collect non-fatal warnings (e.g. unknown keys).
pub fn load_with_warnings(path: &Path) -> Result<(FerryConfig, Vec<ConfigWarning>), ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_with_warnings(&content, path)
}

pub(super) fn parse_with_warnings(
    content: &str,
    path: &Path,
) -> Result<(FerryConfig, Vec<ConfigWarning>), ConfigError> {
    let mut unknown_paths: Vec<String> = Vec::new();
    let deserializer = toml::de::Deserializer::new(content);

    let config: FerryConfig = serde_ignored::deserialize(deserializer, |p| {
        unknown_paths.push(p.to_string());
    })
    .map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let warnings = unknown_paths
        .into_iter()
        .map(|path_str| {
            let key = path_str
                .split('.')
                .next_back()
                .unwrap_or(path_str.as_str())
                .to_string();
            ConfigWarning {
                line: find_line_number(content, &key),
                suggestion: suggest_key(&key),
                file: path.to_path_buf(),
                key,
            }
        })
        .collect();

    Ok((config, warnings))
}

/// Config file to use: the explicit one, `./ferry.toml`, or the user config
pub fn discover(explicit: Option<&Path>, cwd: &Path) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        return Ok(Some(path.to_path_buf()));
    }

    let project = cwd.join(CONFIG_FILE_NAME);
    if project.exists() {
        return Ok(Some(project));
    }

    let user = dirs::config_dir().map(|dir| dir.join("ferry").join("config.toml"));
    Ok(user.filter(|path| path.exists()))
}

/// Discover, load and apply environment overrides
pub fn load(
    explicit: Option<&Path>,
    cwd: &Path,
) -> Result<(FerryConfig, Vec<ConfigWarning>), ConfigError> {
    let (config, warnings) = match discover(explicit, cwd)? {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_with_warnings(&path)?
        }
        None => (FerryConfig::default(), Vec::new()),
    };
    let config = with_env_overrides(config, |key| std::env::var(key).ok())?;
    Ok((config, warnings))
}

/// Apply environment variable overrides (FERRY_* prefix)
pub fn with_env_overrides(
    mut config: FerryConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<FerryConfig, ConfigError> {
    if let Some(value) = env("FERRY_CONCURRENCY") {
        config.release.concurrency = value.trim().parse().map_err(|_| {
            ConfigError::Invalid(format!("FERRY_CONCURRENCY is not a number: '{value}'"))
        })?;
    }

    if let Some(url) = env("FERRY_TARGET_BASE_URL") {
        config.api.target_base_url = url;
    }

    if let Some(value) = env("FERRY_AUTO_APPROVE") {
        config.release.auto_approve = truthy(&value);
    }

    if let Some(value) = env("FERRY_COMPARE") {
        config.release.compare = truthy(&value);
    }

    Ok(config)
}

fn truthy(value: &str) -> bool {
    !matches!(value.trim().to_lowercase().as_str(), "" | "0" | "false" | "no" | "off")
}

fn find_line_number(content: &str, needle: &str) -> Option<usize> {
    content
        .lines()
        .position(|line| line.contains(needle))
        .map(|i| i + 1)
}

fn suggest_key(unknown: &str) -> Option<String> {
    const CANDIDATES: &[&str] = &[
        "api",
        "source_base_url",
        "target_base_url",
        "token_env",
        "timeout_secs",
        "release",
        "concurrency",
        "compare",
        "cross_org",
        "queue_delete_poll_interval_ms",
        "queue_delete_max_attempts",
        "auto_approve",
        "ignored_attributes",
        "cross_org_ignored_attributes",
        "derived_fields",
    ];

    CANDIDATES
        .iter()
        .map(|candidate| (*candidate, levenshtein(unknown, candidate)))
        .min_by_key(|(_, dist)| *dist)
        .filter(|(_, dist)| *dist <= 2)
        .map(|(candidate, _)| candidate.to_string())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();

    for (i, ac) in a.chars().enumerate() {
        let mut curr = vec![i + 1; b.len() + 1];
        for (j, bc) in b.iter().enumerate() {
            let cost = usize::from(ac != *bc);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        prev = curr;
    }

    prev[b.len()]
}
