//! Property tests for Ferry.
//!
//! Properties use randomized input generation to protect invariants of the
//! pure domain services: references map back, overrides settle, merges of
//! undisturbed sides are no-ops.
//!
//! Run with: `cargo test --test properties`

#[path = "properties/references.rs"]
mod references;

#[path = "properties/overrides.rs"]
mod overrides;

#[path = "properties/merge.rs"]
mod merge;
