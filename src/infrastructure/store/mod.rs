//! Object store implementations

mod snapshot;

pub use snapshot::SnapshotStore;
