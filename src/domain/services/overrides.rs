//! Attribute override engine
//!
//! An override map is `path query -> new value`. The path is
//! `<query>.<final key>` (see `path_query`); an empty query addresses the
//! payload root. Value semantics:
//!
//! - `"S /#/ T"` string: regex `S` replaced by `T` inside the current string
//! - any other string, list or scalar: full replacement
//! - object: shallow merge into the current object
//!
//! Overrides run after reference replacement and win over it.

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::path_query::{get_path, get_path_mut, split_override_path, JsonPath, PathSegment};
use crate::error::{FerryError, FerryResult};

/// Reserved token separating a regex from its replacement
pub const REGEX_SEPARATOR: &str = "/#/";

/// A regex rewrite parsed from an `S /#/ T` override value
#[derive(Debug, Clone)]
pub struct RegexRewrite {
    pattern: Regex,
    replacement: String,
}

impl RegexRewrite {
    /// Parse `S /#/ T`; `None` when the value carries no separator
    pub fn parse(path: &str, raw: &str) -> FerryResult<Option<Self>> {
        let Some((pattern, replacement)) = raw.split_once(REGEX_SEPARATOR) else {
            return Ok(None);
        };
        let pattern = Regex::new(pattern.trim()).map_err(|e| FerryError::InvalidOverride {
            path: path.to_string(),
            message: format!("invalid regex '{}': {e}", pattern.trim()),
        })?;
        Ok(Some(Self {
            pattern,
            replacement: replacement.trim().to_string(),
        }))
    }

    pub fn apply(&self, current: &str) -> String {
        self.pattern
            .replace_all(current, self.replacement.as_str())
            .into_owned()
    }
}

/// Apply every override to `payload`; returns the number of locations changed
pub fn apply_overrides(payload: &mut Value, overrides: &Map<String, Value>) -> FerryResult<usize> {
    let mut applied = 0;
    for (path, new_value) in overrides {
        let count = apply_override(payload, path, new_value)?;
        if count == 0 {
            warn!(path = %path, "attribute override matched nothing");
        }
        applied += count;
    }
    Ok(applied)
}

fn apply_override(payload: &mut Value, path: &str, new_value: &Value) -> FerryResult<usize> {
    let (query, key) = split_override_path(path)?;
    let rewrite = match new_value {
        Value::String(s) => RegexRewrite::parse(path, s)?,
        _ => None,
    };

    let matches = query.evaluate(payload);
    let mut applied = 0;
    for location in matches {
        let Some(Value::Object(node)) = get_path_mut(payload, &location) else {
            continue;
        };
        if !query.is_root() && !node.contains_key(&key) {
            debug!(path = %path, "override target lacks the key, skipped");
            continue;
        }

        if let Some(rewrite) = &rewrite {
            match node.get_mut(&key) {
                Some(Value::String(current)) => *current = rewrite.apply(current),
                Some(_) => {
                    return Err(FerryError::InvalidOverride {
                        path: path.to_string(),
                        message: "regex rewrite applies to string values only".to_string(),
                    })
                }
                None => continue,
            }
        } else if let (Some(Value::Object(current)), Value::Object(fields)) =
            (node.get_mut(&key), new_value)
        {
            for (k, v) in fields {
                current.insert(k.clone(), v.clone());
            }
        } else {
            node.insert(key.clone(), new_value.clone());
        }
        applied += 1;
    }
    Ok(applied)
}

/// Reconstruct the override values that turn `source` into `target`
///
/// For each path, target values that differ from the source at the same
/// location are collected: one location gives a scalar, several a list.
/// Paths where nothing differs are left out.
pub fn reverse_attribute_override(
    source: &Value,
    target: &Value,
    paths: &[String],
) -> FerryResult<Map<String, Value>> {
    let mut out = Map::new();
    for path in paths {
        let (query, key) = split_override_path(path)?;
        let mut divergent = Vec::new();
        for location in query.evaluate(target) {
            let Some(target_value) = value_at(target, &location, &key) else {
                continue;
            };
            if value_at(source, &location, &key) != Some(target_value) {
                divergent.push(target_value.clone());
            }
        }
        match divergent.len() {
            0 => {}
            1 => {
                out.insert(path.clone(), divergent.remove(0));
            }
            _ => {
                out.insert(path.clone(), Value::Array(divergent));
            }
        }
    }
    Ok(out)
}

fn value_at<'a>(root: &'a Value, location: &JsonPath, key: &str) -> Option<&'a Value> {
    let mut full = location.clone();
    full.push(PathSegment::Key(key.to_string()));
    get_path(root, &full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn overrides(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn root_key_is_replaced_or_created() {
        let mut payload = json!({"name": "Invoices"});
        let count = apply_overrides(
            &mut payload,
            &overrides(json!({"name": "Invoices (prod)", "locale": "en_US"})),
        )
        .unwrap();
        assert_eq!(count, 2);
        assert_eq!(payload, json!({"name": "Invoices (prod)", "locale": "en_US"}));
    }

    #[test]
    fn regex_rewrites_part_of_a_string() {
        let mut payload = json!({"settings": {"url": "https://dev.example.com/hook"}});
        apply_overrides(
            &mut payload,
            &overrides(json!({"settings.url": "dev\\. /#/ prod."})),
        )
        .unwrap();
        assert_eq!(payload["settings"]["url"], json!("https://prod.example.com/hook"));
    }

    #[test]
    fn object_value_is_shallow_merged() {
        let mut payload = json!({"settings": {"a": 1, "b": {"x": 1}}});
        apply_overrides(
            &mut payload,
            &overrides(json!({"settings": {"b": {"y": 2}, "c": 3}})),
        )
        .unwrap();
        assert_eq!(payload, json!({"settings": {"a": 1, "b": {"y": 2}, "c": 3}}));
    }

    #[test]
    fn projection_skips_matches_without_the_key() {
        let mut payload = json!({"settings": {"configurations": [
            {"queue_ids": [1]},
            {"other": true}
        ]}});
        let count = apply_overrides(
            &mut payload,
            &overrides(json!({"settings.configurations[*].queue_ids": [9]})),
        )
        .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            payload["settings"]["configurations"],
            json!([{"queue_ids": [9]}, {"other": true}])
        );
    }

    #[test]
    fn list_result_of_parent_query_is_flattened() {
        let mut payload = json!({"columns": [{"width": 1}, {"width": 2}]});
        apply_overrides(&mut payload, &overrides(json!({"columns.width": 5}))).unwrap();
        assert_eq!(payload, json!({"columns": [{"width": 5}, {"width": 5}]}));
    }

    #[test]
    fn regex_on_non_string_is_rejected() {
        let mut payload = json!({"count": 3});
        let err = apply_overrides(&mut payload, &overrides(json!({"count": "3 /#/ 4"}))).unwrap_err();
        assert!(matches!(err, FerryError::InvalidOverride { .. }));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let mut payload = json!({"name": "x"});
        assert!(apply_overrides(&mut payload, &overrides(json!({"name": "( /#/ y"}))).is_err());
    }

    #[test]
    fn reverse_override_single_and_multiple() {
        let source = json!({"name": "Invoices", "columns": [{"w": 1}, {"w": 2}, {"w": 3}]});
        let target = json!({"name": "Invoices (prod)", "columns": [{"w": 1}, {"w": 5}, {"w": 6}]});
        let reversed = reverse_attribute_override(
            &source,
            &target,
            &["name".to_string(), "columns.w".to_string(), "missing".to_string()],
        )
        .unwrap();
        assert_eq!(
            Value::Object(reversed),
            json!({"name": "Invoices (prod)", "columns.w": [5, 6]})
        );
    }
}
