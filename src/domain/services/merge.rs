//! Three-way merge
//!
//! Compares the last applied payload, the staged source payload and the
//! current remote object, field by field, recursing into nested objects.
//! Lists and scalars are compared as whole values. Paths are dotted.
//!
//! Per field, first matching rule wins:
//!
//! 1. ignored: take source, else target, else last applied
//! 2. derived and absent from source: take target
//! 3. both sides are objects: recurse
//! 4. source == target: take it
//! 5. only source changed: take source
//! 6. only target changed: rebase candidate, keep source
//! 7. override field: take source
//! 8. otherwise: conflict, keep source

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Both sides of a conflicting field
#[derive(Debug, Clone, PartialEq)]
pub struct MergeConflict {
    pub source: Value,
    pub target: Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergeResult {
    pub merged: Value,
    pub conflicts: BTreeMap<String, MergeConflict>,
    pub rebase_candidates: BTreeMap<String, Value>,
}

impl MergeResult {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.rebase_candidates.is_empty()
    }
}

/// Field classifications used by `three_way_merge`
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeFields<'a> {
    pub ignored: &'a [String],
    pub overrides: &'a [String],
    pub derived: &'a [String],
}

impl MergeFields<'_> {
    fn contains(list: &[String], path: &str) -> bool {
        list.iter().any(|p| p == path)
    }
}

pub fn three_way_merge(
    last_applied: &Value,
    source: &Value,
    target: &Value,
    fields: MergeFields<'_>,
) -> MergeResult {
    let mut result = MergeResult::default();
    let merged = merge_value(
        "",
        Some(last_applied),
        Some(source),
        Some(target),
        fields,
        &mut result,
    );
    result.merged = merged.unwrap_or(Value::Null);
    result
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn merge_object(
    prefix: &str,
    last: Option<&Map<String, Value>>,
    source: &Map<String, Value>,
    target: &Map<String, Value>,
    fields: MergeFields<'_>,
    result: &mut MergeResult,
) -> Value {
    let mut merged = Map::new();
    let keys = source
        .keys()
        .chain(target.keys().filter(|k| !source.contains_key(*k)));
    for key in keys {
        let path = join_path(prefix, key);
        let value = merge_value(
            &path,
            last.and_then(|l| l.get(key)),
            source.get(key),
            target.get(key),
            fields,
            result,
        );
        if let Some(value) = value {
            merged.insert(key.clone(), value);
        }
    }
    Value::Object(merged)
}

fn merge_value(
    path: &str,
    last: Option<&Value>,
    source: Option<&Value>,
    target: Option<&Value>,
    fields: MergeFields<'_>,
    result: &mut MergeResult,
) -> Option<Value> {
    if MergeFields::contains(fields.ignored, path) {
        return source.or(target).or(last).cloned();
    }
    if MergeFields::contains(fields.derived, path) && source.is_none() {
        return target.cloned();
    }
    if let (Some(Value::Object(s)), Some(Value::Object(t))) = (source, target) {
        let l = last.and_then(Value::as_object);
        return Some(merge_object(path, l, s, t, fields, result));
    }
    if source == target {
        return source.cloned();
    }
    if source != last && target == last {
        return source.cloned();
    }
    if source == last && target != last {
        result
            .rebase_candidates
            .insert(path.to_string(), target.cloned().unwrap_or(Value::Null));
        return source.cloned();
    }
    if MergeFields::contains(fields.overrides, path) {
        return source.cloned();
    }
    result.conflicts.insert(
        path.to_string(),
        MergeConflict {
            source: source.cloned().unwrap_or(Value::Null),
            target: target.cloned().unwrap_or(Value::Null),
        },
    );
    source.cloned()
}
