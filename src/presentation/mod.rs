//! Presentation Layer
//!
//! This layer handles:
//! - CLI argument parsing (via clap)
//! - Creating use cases with infrastructure dependencies
//! - Output formatting (text/JSON)
//!
//! ## Structure
//!
//! - `cli` - Command line definition
//! - `factory` - Creates use cases with proper dependencies (dependency injection)
//! - `output` - Plan and result rendering
//!
//! ## Usage
//!
//! ```ignore
//! use ferry::presentation::factory::{create_release_use_case, ReleasePaths, RunMode};
//!
//! let use_case = create_release_use_case(&config, &ReleasePaths::beside("release.yaml"), RunMode::default())?;
//! let plan = use_case.plan(&manifest).await?;
//! ```

pub mod cli;
pub mod factory;
pub mod output;

pub use factory::{create_release_use_case, ReleasePaths, RunMode};
