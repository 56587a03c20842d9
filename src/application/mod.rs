//! Application Layer
//!
//! Use cases that orchestrate the business flow.
//! This layer:
//! - Depends on Domain layer (entities, services, ports)
//! - Does NOT contain business rules (those are in Domain)
//! - Coordinates between Infrastructure and Domain
//!
//! ## Use Cases
//!
//! - `ReleaseUseCase` - Plans, applies and reverts releases (initialize, prepare,
//!   override references, compare, deploy in two passes, persist state)

pub mod release;

pub use release::{
    PlanAction, PlanEntry, ReleaseConfig, ReleasePlan, ReleaseResult, ReleaseUseCase,
    RevertResult,
};
