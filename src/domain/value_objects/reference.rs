//! Reference values embedded in resource payloads
//!
//! A reference is either a bare integer id or a URL whose last path segment is
//! the id (`https://api.example.com/v1/queues/123`). Rewriting a reference keeps
//! its original shape.

use serde_json::Value;

use super::{ObjectId, ResourceType};

/// Suffix appended to placeholder ids so they can never collide with real ids
pub const DUMMY_ID_SUFFIX: &str = "100000000";

/// Marker prefix for target-side values with no source-side equivalent
pub const UNKNOWN_REFERENCE: &str = "UNKNOWN_REFERENCE";

/// Extract the id a reference value points at
pub fn extract_id(value: &Value) -> Option<ObjectId> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let trimmed = s.trim_end_matches('/');
            let last = trimmed.rsplit('/').next()?;
            last.parse().ok()
        }
        _ => None,
    }
}

/// Build the canonical URL of a resource
pub fn reference_url(base_url: &str, resource_type: ResourceType, id: impl std::fmt::Display) -> String {
    format!(
        "{}/{}/{}",
        base_url.trim_end_matches('/'),
        resource_type.plural(),
        id
    )
}

/// Placeholder id for a target that does not exist yet
pub fn dummy_id(source_id: ObjectId, target_index: usize) -> String {
    format!("{source_id}{target_index}{DUMMY_ID_SUFFIX}")
}

pub fn is_dummy_reference(value: &Value) -> bool {
    match value {
        Value::String(s) => s.trim_end_matches('/').ends_with(DUMMY_ID_SUFFIX),
        _ => false,
    }
}

/// Render `id` in the same shape as `original` (URL stays URL, number stays number)
pub fn render_reference(
    original: &Value,
    base_url: &str,
    resource_type: ResourceType,
    id: ObjectId,
) -> Value {
    match original {
        Value::String(_) => Value::String(reference_url(base_url, resource_type, id)),
        _ => Value::from(id),
    }
}

/// Render a placeholder reference in the same shape as `original`
pub fn render_dummy_reference(
    original: &Value,
    base_url: &str,
    resource_type: ResourceType,
    source_id: ObjectId,
    target_index: usize,
) -> Value {
    let dummy = dummy_id(source_id, target_index);
    match original {
        Value::String(_) => Value::String(reference_url(base_url, resource_type, dummy)),
        _ => Value::String(dummy),
    }
}

pub fn unknown_reference(value: &Value) -> Value {
    let inner = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Value::String(format!("{UNKNOWN_REFERENCE}({inner})"))
}
