//! Differ Domain Service
//!
//! Line diffs between the remote object and the staged payload, used to
//! render release plans.

use serde_json::{Map, Value};
use similar::{ChangeTag, TextDiff};

/// Type of change in a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffTag {
    Delete,
    Insert,
    Equal,
}

impl From<ChangeTag> for DiffTag {
    fn from(tag: ChangeTag) -> Self {
        match tag {
            ChangeTag::Delete => DiffTag::Delete,
            ChangeTag::Insert => DiffTag::Insert,
            ChangeTag::Equal => DiffTag::Equal,
        }
    }
}

/// Result of diffing two payloads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadDiff {
    /// Unified diff text (empty when nothing changed)
    pub unified: String,
    pub additions: usize,
    pub deletions: usize,
}

impl PayloadDiff {
    pub fn has_changes(&self) -> bool {
        self.additions > 0 || self.deletions > 0
    }

    /// e.g. "+5, -3"
    pub fn summary(&self) -> String {
        format!("+{}, -{}", self.additions, self.deletions)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Differ;

impl Differ {
    pub fn new() -> Self {
        Self
    }

    /// Diff pretty-printed `old` against `new`; `None` is rendered as an empty document
    pub fn diff_payloads(&self, old: Option<&Value>, new: &Value, header: (&str, &str)) -> PayloadDiff {
        let old_text = old.map(pretty).unwrap_or_default();
        let new_text = pretty(new);
        self.diff_text(&old_text, &new_text, header)
    }

    pub fn diff_text(&self, old: &str, new: &str, header: (&str, &str)) -> PayloadDiff {
        let text_diff = TextDiff::from_lines(old, new);

        let mut result = PayloadDiff::default();
        for change in text_diff.iter_all_changes() {
            match DiffTag::from(change.tag()) {
                DiffTag::Delete => result.deletions += 1,
                DiffTag::Insert => result.additions += 1,
                DiffTag::Equal => {}
            }
        }
        if result.has_changes() {
            result.unified = text_diff
                .unified_diff()
                .context_radius(3)
                .header(header.0, header.1)
                .to_string();
        }
        result
    }
}

/// The part of `remote` that `staged` would write (top-level keys of `staged` only)
pub fn project_onto(remote: &Value, staged: &Value) -> Value {
    match (remote, staged) {
        (Value::Object(remote), Value::Object(staged)) => {
            let projected: Map<String, Value> = staged
                .keys()
                .filter_map(|k| remote.get(k).map(|v| (k.clone(), v.clone())))
                .collect();
            Value::Object(projected)
        }
        _ => remote.clone(),
    }
}

fn pretty(value: &Value) -> String {
    let mut text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    text.push('\n');
    text
}
