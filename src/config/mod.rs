//! Configuration module for Ferry
//!
//! Configuration hierarchy:
//! 1. CLI flags (highest priority)
//! 2. Environment variables (FERRY_*)
//! 3. Config file (`--config`, `./ferry.toml`, or `~/.config/ferry/config.toml`)
//! 4. Built-in defaults (lowest priority)

mod loader;
mod types;

pub use loader::{discover, load, load_with_warnings, with_env_overrides, CONFIG_FILE_NAME};
pub use types::{ApiConfig, ConfigError, ConfigWarning, FerryConfig, FieldTable, ReleaseSection};
