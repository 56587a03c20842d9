//! Release Event Port
//!
//! Provides an observable interface for release operations.
//! Enables progress reporting, JSON event streams, and debugging.

use crate::domain::value_objects::{ObjectId, ObjectRef, Phase};

/// Event emitted during release operations
#[derive(Debug, Clone)]
pub enum ReleaseEvent {
    /// A phase started
    PhaseStarted { phase: Phase, object_count: usize },

    /// A phase finished (failures included)
    PhaseCompleted { phase: Phase, failure_count: usize },

    /// A target was created or updated
    ObjectDeployed {
        object: ObjectRef,
        target_id: ObjectId,
        created: bool,
    },

    /// An object failed within a phase
    ObjectFailed { object: ObjectRef, error: String },

    /// A target was deleted (or was already gone)
    ObjectDeleted { object: ObjectRef, target_id: ObjectId },

    /// Three-way comparison found target-side drift or conflicts
    DriftDetected {
        object: ObjectRef,
        target_id: ObjectId,
        rebase_candidates: usize,
        conflicts: usize,
    },
}

/// Trait for receiving release events
///
/// Implementations can be:
/// - JsonEventSink: NDJSON event stream for CI
/// - NoopEventSink: Silent operation
pub trait ReleaseEventSink: Send + Sync {
    /// Handle a release event
    fn on_event(&self, event: ReleaseEvent);
}

/// No-op event sink for silent operation
pub struct NoopEventSink;

impl ReleaseEventSink for NoopEventSink {
    fn on_event(&self, _event: ReleaseEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::ResourceType;
    use std::sync::{Arc, Mutex};

    /// Test event sink that records all events
    struct RecordingEventSink {
        events: Arc<Mutex<Vec<ReleaseEvent>>>,
    }

    impl ReleaseEventSink for RecordingEventSink {
        fn on_event(&self, event: ReleaseEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn recording_sink_captures_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingEventSink {
            events: events.clone(),
        };

        sink.on_event(ReleaseEvent::PhaseStarted {
            phase: Phase::Initialize,
            object_count: 3,
        });
        sink.on_event(ReleaseEvent::ObjectDeployed {
            object: ObjectRef::new(ResourceType::Queue, 10, "Invoices"),
            target_id: 55,
            created: false,
        });

        assert_eq!(events.lock().unwrap().len(), 2);
    }
}
