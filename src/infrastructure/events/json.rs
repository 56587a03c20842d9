//! JSON Event Sink
//!
//! Outputs release events as NDJSON for CI/automation consumption.

use std::io::{self, Write};
use std::sync::Mutex;

use serde_json::json;

use crate::domain::ports::{ReleaseEvent, ReleaseEventSink};
use crate::domain::value_objects::ObjectRef;

/// Event sink that outputs NDJSON events to stdout
pub struct JsonEventSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonEventSink {
    pub fn stdout() -> Self {
        Self {
            writer: Mutex::new(Box::new(io::stdout())),
        }
    }

    /// Create a JSON event sink writing to a custom writer
    pub fn with_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    fn write_event(&self, event: serde_json::Value) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", event);
            let _ = writer.flush();
        }
    }
}

fn object_json(object: &ObjectRef) -> serde_json::Value {
    json!({
        "type": object.resource_type.plural(),
        "id": object.id,
        "name": object.name,
    })
}

impl ReleaseEventSink for JsonEventSink {
    fn on_event(&self, event: ReleaseEvent) {
        let json = match event {
            ReleaseEvent::PhaseStarted {
                phase,
                object_count,
            } => json!({
                "event": "phase_start",
                "phase": phase.as_str(),
                "object_count": object_count,
            }),

            ReleaseEvent::PhaseCompleted {
                phase,
                failure_count,
            } => json!({
                "event": "phase_complete",
                "phase": phase.as_str(),
                "status": if failure_count == 0 { "success" } else { "failed" },
                "failures": failure_count,
            }),

            ReleaseEvent::ObjectDeployed {
                object,
                target_id,
                created,
            } => json!({
                "event": "object_deployed",
                "object": object_json(&object),
                "target_id": target_id,
                "action": if created { "created" } else { "updated" },
            }),

            ReleaseEvent::ObjectFailed { object, error } => json!({
                "event": "object_failed",
                "object": object_json(&object),
                "error": error,
            }),

            ReleaseEvent::ObjectDeleted { object, target_id } => json!({
                "event": "object_deleted",
                "object": object_json(&object),
                "target_id": target_id,
            }),

            ReleaseEvent::DriftDetected {
                object,
                target_id,
                rebase_candidates,
                conflicts,
            } => json!({
                "event": "drift_detected",
                "object": object_json(&object),
                "target_id": target_id,
                "rebase_candidates": rebase_candidates,
                "conflicts": conflicts,
            }),
        };

        self.write_event(json);
    }
}
