//! Release Module
//!
//! Orchestrates releases of configuration objects between two environments.
//!
//! ## Structure
//!
//! - `options` - Configuration of one run (`ReleaseConfig`)
//! - `result` - Plans, phase reports and run summaries
//! - `strategy` - Per-resource-type payload rules
//! - `dispatcher` - Bounded-concurrency access to the remote API
//! - `use_case` - Plan and apply (`ReleaseUseCase`)
//! - `revert` - Deleting deployed targets
//! - `reverse` - Building the manifest of the opposite release
//!
//! ## Usage
//!
//! ```ignore
//! use ferry::application::release::{ReleaseConfig, ReleaseUseCase};
//!
//! let use_case = ReleaseUseCase::new(store, state_repo, manifest_repo, api, ReleaseConfig::new());
//! let plan = use_case.plan(&manifest).await?;
//! let result = use_case.apply(&mut manifest).await?;
//! ```

mod dispatcher;
mod options;
mod result;
mod revert;
mod reverse;
mod strategy;
mod use_case;

pub use dispatcher::Dispatcher;
pub use options::ReleaseConfig;
pub use result::{
    PhaseReport, PlanAction, PlanEntry, ReleasePlan, ReleaseResult, RevertResult,
    TargetComparison,
};
pub use revert::REVERT_ORDER;
pub use strategy::{
    default_ignored_fields, strategy_for, CompositeLinks, Deletion, ResourceStrategy,
    COMMON_READ_ONLY_FIELDS,
};
pub use use_case::ReleaseUseCase;

#[cfg(test)]
mod tests;
