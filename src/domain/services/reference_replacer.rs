//! Reference replacer
//!
//! Rewrites references embedded in a target payload from source ids to the
//! ids of the matching targets. One `ReferenceReplacer` works on one target of
//! one object and collects the warnings raised on the way.
//!
//! Resolution of a referenced source id:
//!
//! 1. Pick a candidate target of the dependency (`pick_candidate`): N:N pairs by
//!    index, anything else shares the first candidate.
//! 2. The candidate has an id: render it in the shape of the original value.
//! 3. No id yet: a placeholder while planning, omitted in the first apply pass
//!    (the second pass fills it in), an error afterwards.
//! 4. No candidate at all: the field's `MissingPolicy` decides.
//!
//! The free-text scan leaves digits inside URLs alone: a URL carries its own
//! host, and rewriting only its id would point the source host at a target id.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::lookup::{pick_candidate, LookupTable, Pick, ReverseLookupTable};
use crate::domain::value_objects::{
    dummy_id, extract_id, render_dummy_reference, render_reference, unknown_reference, ObjectId,
    ObjectRef, ResourceType,
};
use crate::error::{FerryError, FerryResult};

static ID_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+\b").expect("id token pattern is valid"));

static URL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9+.-]*://\S+").expect("url pattern is valid"));

/// Which step of the pipeline references are resolved for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceMode {
    /// Plan rendering; not-yet-created dependencies become placeholders
    Plan,
    /// First apply pass; not-yet-created dependencies are left out
    FirstPass,
    /// Second apply pass; every dependency must have an id
    Final,
}

/// What to do when a referenced object has no target mapping at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingPolicy {
    /// Keep the original value (dependency assumed to exist on the target)
    KeepOriginal,
    /// Drop the key (or list item)
    OmitField,
    #[default]
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceShape {
    Single,
    List,
}

/// A known reference field of a resource payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceField {
    /// Dotted path of the field
    pub path: &'static str,
    pub target: ResourceType,
    pub shape: ReferenceShape,
    pub policy: MissingPolicy,
    /// Keep target-only list items that map back to no source object
    pub keep_without_equivalent: bool,
}

impl ReferenceField {
    pub const fn single(path: &'static str, target: ResourceType) -> Self {
        Self {
            path,
            target,
            shape: ReferenceShape::Single,
            policy: MissingPolicy::Fail,
            keep_without_equivalent: false,
        }
    }

    pub const fn list(path: &'static str, target: ResourceType) -> Self {
        Self {
            shape: ReferenceShape::List,
            ..Self::single(path, target)
        }
    }

    pub const fn with_policy(mut self, policy: MissingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub const fn keeping_target_only(mut self) -> Self {
        self.keep_without_equivalent = true;
        self
    }
}

/// Something the operator should know about, raised while rewriting references
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceWarning {
    /// Several referencing targets share one dependency target (N:1)
    SharedDependency {
        field: String,
        dependency: ResourceType,
        dependency_id: ObjectId,
        candidates: usize,
        targets: usize,
    },
    /// A free-text id is known under more than one resource type
    AmbiguousId {
        path: String,
        id: ObjectId,
        types: Vec<ResourceType>,
    },
    /// A free-text id has no target mapping and was stripped
    UnresolvedId { path: String, id: ObjectId },
    /// A `run_after` chain ended without a released predecessor
    DroppedRunAfter { hook_id: ObjectId },
    /// A list item carries no id and was dropped
    UnparsableReference { field: String, value: String },
}

impl std::fmt::Display for ReferenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceWarning::SharedDependency {
                field,
                dependency,
                dependency_id,
                candidates,
                targets,
            } => write!(
                f,
                "'{field}': {targets} target(s) share the first of {candidates} target(s) of {dependency} {dependency_id}"
            ),
            ReferenceWarning::AmbiguousId { path, id, types } => {
                let types: Vec<&str> = types.iter().map(|t| t.display_name()).collect();
                write!(f, "'{path}': id {id} is ambiguous ({}), left unchanged", types.join(", "))
            }
            ReferenceWarning::UnresolvedId { path, id } => {
                write!(f, "'{path}': id {id} has no target mapping, removed")
            }
            ReferenceWarning::DroppedRunAfter { hook_id } => {
                write!(f, "run_after: hook {hook_id} is not released and has no released predecessor, dropped")
            }
            ReferenceWarning::UnparsableReference { field, value } => {
                write!(f, "'{field}': {value} is not a reference, dropped")
            }
        }
    }
}

/// `run_after` edges of every loaded hook, keyed by source id
#[derive(Debug, Clone, Default)]
pub struct HookGraph {
    run_after: HashMap<ObjectId, Vec<ObjectId>>,
}

impl HookGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, hook_id: ObjectId, payload: &Value) {
        let predecessors = payload
            .get("run_after")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(extract_id).collect())
            .unwrap_or_default();
        self.run_after.insert(hook_id, predecessors);
    }

    pub fn predecessors(&self, hook_id: ObjectId) -> Option<&[ObjectId]> {
        self.run_after.get(&hook_id).map(Vec::as_slice)
    }
}

/// Shared inputs for every replacer of one resolution step
#[derive(Debug, Clone, Copy)]
pub struct ReferenceContext<'a> {
    pub lookup: &'a LookupTable,
    pub reverse: &'a ReverseLookupTable,
    /// Base URL of the environment references are rendered for
    pub base_url: &'a str,
    pub mode: ReferenceMode,
}

enum Resolution {
    Id(ObjectId),
    Dummy { source_id: ObjectId, index: usize },
    Pending,
    Unmapped,
}

enum FreeText {
    Untouched,
    Replace(String),
    Strip,
}

#[derive(PartialEq, Eq)]
enum Leaf {
    Keep,
    Strip,
}

/// Rewrites the references of one target payload
pub struct ReferenceReplacer<'a> {
    ctx: ReferenceContext<'a>,
    object: ObjectRef,
    target_index: usize,
    target_count: usize,
    warnings: Vec<ReferenceWarning>,
}

impl<'a> ReferenceReplacer<'a> {
    pub fn new(
        ctx: ReferenceContext<'a>,
        object: ObjectRef,
        target_index: usize,
        target_count: usize,
    ) -> Self {
        Self {
            ctx,
            object,
            target_index,
            target_count,
            warnings: Vec::new(),
        }
    }

    pub fn warnings(&self) -> &[ReferenceWarning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<ReferenceWarning> {
        self.warnings
    }

    fn warn(&mut self, warning: ReferenceWarning) {
        warn!(object = %self.object, target = self.target_index, "{warning}");
        self.warnings.push(warning);
    }

    /// Rewrite every field in `fields`; `remote` is the current target-side object
    pub fn apply_fields(
        &mut self,
        payload: &mut Value,
        fields: &[ReferenceField],
        remote: Option<&Value>,
    ) -> FerryResult<()> {
        for field in fields {
            match field.shape {
                ReferenceShape::Single => {
                    self.replace_reference_url(payload, field.path, field.target, field.policy)?
                }
                ReferenceShape::List => self.replace_list_of_reference_urls(
                    payload,
                    field.path,
                    field.target,
                    field.policy,
                    field.keep_without_equivalent,
                    remote,
                )?,
            }
        }
        Ok(())
    }

    /// Rewrite a single reference field
    pub fn replace_reference_url(
        &mut self,
        payload: &mut Value,
        field: &str,
        expected: ResourceType,
        policy: MissingPolicy,
    ) -> FerryResult<()> {
        let Some((parent, key)) = parent_mut(payload, field) else {
            return Ok(());
        };
        let Some(original) = parent.get(key).cloned() else {
            return Ok(());
        };
        if original.is_null() {
            return Ok(());
        }
        let Some(source_id) = extract_id(&original) else {
            debug!(object = %self.object, field, "reference without an id, left unchanged");
            return Ok(());
        };

        match self.resolve(field, source_id, expected)? {
            Resolution::Id(id) => {
                let rendered = render_reference(&original, self.ctx.base_url, expected, id);
                parent.insert(key.to_string(), rendered);
            }
            Resolution::Dummy { source_id, index } => {
                let rendered =
                    render_dummy_reference(&original, self.ctx.base_url, expected, source_id, index);
                parent.insert(key.to_string(), rendered);
            }
            Resolution::Pending => {
                parent.remove(key);
            }
            Resolution::Unmapped => match policy {
                MissingPolicy::KeepOriginal => {}
                MissingPolicy::OmitField => {
                    parent.remove(key);
                }
                MissingPolicy::Fail => {
                    return Err(self.unresolved(field, expected, source_id, "no target mapping"))
                }
            },
        }
        Ok(())
    }

    /// Rewrite a list of references item by item
    pub fn replace_list_of_reference_urls(
        &mut self,
        payload: &mut Value,
        field: &str,
        expected: ResourceType,
        policy: MissingPolicy,
        keep_without_equivalent: bool,
        remote: Option<&Value>,
    ) -> FerryResult<()> {
        let Some((parent, key)) = parent_mut(payload, field) else {
            return Ok(());
        };
        let Some(Value::Array(items)) = parent.get(key).cloned() else {
            return Ok(());
        };

        let mut out: Vec<Value> = Vec::with_capacity(items.len());
        for item in &items {
            let Some(source_id) = extract_id(item) else {
                out.push(item.clone());
                continue;
            };
            match self.resolve(field, source_id, expected)? {
                Resolution::Id(id) => {
                    out.push(render_reference(item, self.ctx.base_url, expected, id))
                }
                Resolution::Dummy { source_id, index } => out.push(render_dummy_reference(
                    item,
                    self.ctx.base_url,
                    expected,
                    source_id,
                    index,
                )),
                Resolution::Pending => {}
                Resolution::Unmapped => match policy {
                    MissingPolicy::KeepOriginal => out.push(item.clone()),
                    MissingPolicy::OmitField => {}
                    MissingPolicy::Fail => {
                        return Err(self.unresolved(field, expected, source_id, "no target mapping"))
                    }
                },
            }
        }

        if keep_without_equivalent {
            let remote_items = remote
                .and_then(|r| get_dotted(r, field))
                .and_then(Value::as_array);
            for remote_item in remote_items.into_iter().flatten() {
                let Some(target_id) = extract_id(remote_item) else {
                    continue;
                };
                let has_equivalent = self.ctx.reverse.get(expected, target_id).is_some();
                let present = out.iter().any(|o| extract_id(o) == Some(target_id));
                if !has_equivalent && !present {
                    debug!(object = %self.object, field, target_id, "kept target-only reference");
                    out.push(remote_item.clone());
                }
            }
        }

        dedup_references(&mut out);
        parent.insert(key.to_string(), Value::Array(out));
        Ok(())
    }

    /// Rewrite a hook's `run_after`, walking past predecessors that are not released
    pub fn replace_run_after(
        &mut self,
        payload: &mut Value,
        field: &str,
        graph: &HookGraph,
    ) -> FerryResult<()> {
        let Some((parent, key)) = parent_mut(payload, field) else {
            return Ok(());
        };
        let Some(Value::Array(items)) = parent.get(key).cloned() else {
            return Ok(());
        };

        let mut out = Vec::new();
        for item in &items {
            let Some(hook_id) = extract_id(item) else {
                self.warn(ReferenceWarning::UnparsableReference {
                    field: field.to_string(),
                    value: item.to_string(),
                });
                continue;
            };
            let mut ancestors = Vec::new();
            self.released_predecessors(hook_id, graph, &mut HashSet::new(), &mut ancestors);
            for ancestor in ancestors {
                match self.resolve(field, ancestor, ResourceType::Hook)? {
                    Resolution::Id(id) => {
                        out.push(render_reference(item, self.ctx.base_url, ResourceType::Hook, id))
                    }
                    Resolution::Dummy { source_id, index } => out.push(render_dummy_reference(
                        item,
                        self.ctx.base_url,
                        ResourceType::Hook,
                        source_id,
                        index,
                    )),
                    Resolution::Pending | Resolution::Unmapped => {}
                }
            }
        }

        dedup_references(&mut out);
        parent.insert(key.to_string(), Value::Array(out));
        Ok(())
    }

    fn released_predecessors(
        &mut self,
        hook_id: ObjectId,
        graph: &HookGraph,
        visited: &mut HashSet<ObjectId>,
        out: &mut Vec<ObjectId>,
    ) {
        if !self.ctx.lookup.candidates(hook_id, ResourceType::Hook).is_empty() {
            out.push(hook_id);
            return;
        }
        if !visited.insert(hook_id) {
            return;
        }
        match graph.predecessors(hook_id) {
            Some(predecessors) if !predecessors.is_empty() => {
                for predecessor in predecessors.to_vec() {
                    self.released_predecessors(predecessor, graph, visited, out);
                }
            }
            _ => self.warn(ReferenceWarning::DroppedRunAfter { hook_id }),
        }
    }

    /// Substitute known source ids found anywhere below `subtree`
    pub fn replace_free_text(&mut self, payload: &mut Value, subtree: &str) -> FerryResult<()> {
        let Some((parent, key)) = parent_mut(payload, subtree) else {
            return Ok(());
        };
        let Some(node) = parent.get_mut(key) else {
            return Ok(());
        };
        if self.scan(node, subtree)? == Leaf::Strip {
            parent.remove(key);
        }
        Ok(())
    }

    fn scan(&mut self, node: &mut Value, path: &str) -> FerryResult<Leaf> {
        match node {
            Value::Object(map) => {
                let keys: Vec<String> = map.keys().cloned().collect();
                for key in keys {
                    let child_path = format!("{path}.{key}");
                    let strip = match map.get_mut(&key) {
                        Some(child) => self.scan(child, &child_path)? == Leaf::Strip,
                        None => false,
                    };
                    if strip {
                        map.remove(&key);
                    }
                }
                Ok(Leaf::Keep)
            }
            Value::Array(items) => {
                let taken = std::mem::take(items);
                for (i, mut item) in taken.into_iter().enumerate() {
                    if self.scan(&mut item, &format!("{path}[{i}]"))? == Leaf::Keep {
                        items.push(item);
                    }
                }
                Ok(Leaf::Keep)
            }
            Value::Number(n) => {
                let Some(id) = n.as_i64() else {
                    return Ok(Leaf::Keep);
                };
                match self.free_text_id(path, id)? {
                    FreeText::Untouched => {}
                    FreeText::Replace(new_id) => {
                        *node = match new_id.parse::<i64>() {
                            Ok(n) => Value::from(n),
                            Err(_) => Value::String(new_id),
                        };
                    }
                    FreeText::Strip => return Ok(Leaf::Strip),
                }
                Ok(Leaf::Keep)
            }
            Value::String(s) => {
                if !ID_TOKEN.is_match(s) {
                    return Ok(Leaf::Keep);
                }
                let urls: Vec<Range<usize>> = URL_TOKEN.find_iter(s).map(|m| m.range()).collect();
                let in_url = |start: usize| urls.iter().any(|url| url.contains(&start));
                if !urls.is_empty() {
                    debug!(object = %self.object, path, "ids inside URLs left unchanged");
                }
                let tokens: Vec<ObjectId> = ID_TOKEN
                    .find_iter(s)
                    .filter(|m| !in_url(m.start()))
                    .filter_map(|m| m.as_str().parse().ok())
                    .collect();
                let mut decisions = HashMap::new();
                for id in tokens {
                    if !decisions.contains_key(&id) {
                        let decision = self.free_text_id(path, id)?;
                        decisions.insert(id, decision);
                    }
                }
                let rewritten = ID_TOKEN.replace_all(s, |caps: &Captures| {
                    let token = &caps[0];
                    if caps.get(0).is_some_and(|m| in_url(m.start())) {
                        return token.to_string();
                    }
                    let decision = token.parse::<ObjectId>().ok().and_then(|id| decisions.get(&id));
                    match decision {
                        Some(FreeText::Replace(new_id)) => new_id.clone(),
                        Some(FreeText::Strip) => String::new(),
                        _ => token.to_string(),
                    }
                });
                *s = rewritten.into_owned();
                Ok(Leaf::Keep)
            }
            _ => Ok(Leaf::Keep),
        }
    }

    fn free_text_id(&mut self, path: &str, id: ObjectId) -> FerryResult<FreeText> {
        if !self.ctx.lookup.contains(id) {
            return Ok(FreeText::Untouched);
        }
        let types = self.ctx.lookup.types_with_targets(id);
        match types.as_slice() {
            [] => {
                self.warn(ReferenceWarning::UnresolvedId {
                    path: path.to_string(),
                    id,
                });
                Ok(FreeText::Strip)
            }
            [resource_type] => match self.resolve(path, id, *resource_type)? {
                Resolution::Id(target_id) => Ok(FreeText::Replace(target_id.to_string())),
                Resolution::Dummy { source_id, index } => {
                    Ok(FreeText::Replace(dummy_id(source_id, index)))
                }
                Resolution::Pending => Ok(FreeText::Strip),
                Resolution::Unmapped => {
                    self.warn(ReferenceWarning::UnresolvedId {
                        path: path.to_string(),
                        id,
                    });
                    Ok(FreeText::Strip)
                }
            },
            _ => {
                self.warn(ReferenceWarning::AmbiguousId {
                    path: path.to_string(),
                    id,
                    types,
                });
                Ok(FreeText::Untouched)
            }
        }
    }

    fn resolve(
        &mut self,
        field: &str,
        source_id: ObjectId,
        expected: ResourceType,
    ) -> FerryResult<Resolution> {
        let candidates = self.ctx.lookup.candidates(source_id, expected);
        let Some(pick) = pick_candidate(candidates, self.target_index, self.target_count) else {
            return Ok(Resolution::Unmapped);
        };
        if let Pick::Shared { candidates, .. } = pick {
            self.warn(ReferenceWarning::SharedDependency {
                field: field.to_string(),
                dependency: expected,
                dependency_id: source_id,
                candidates,
                targets: self.target_count,
            });
        }

        let slot = pick.slot();
        match (slot.id, self.ctx.mode) {
            (Some(id), _) => Ok(Resolution::Id(id)),
            (None, ReferenceMode::Plan) => Ok(Resolution::Dummy {
                source_id,
                index: slot.index,
            }),
            (None, ReferenceMode::FirstPass) if slot.owner_failed => {
                Err(self.unresolved(field, expected, source_id, "the dependency failed to deploy"))
            }
            (None, ReferenceMode::FirstPass) => Ok(Resolution::Pending),
            (None, ReferenceMode::Final) => Err(self.unresolved(
                field,
                expected,
                source_id,
                "the dependency has no target id",
            )),
        }
    }

    fn unresolved(
        &self,
        field: &str,
        expected: ResourceType,
        dependency_id: ObjectId,
        reason: &str,
    ) -> FerryError {
        FerryError::DependencyUnresolved {
            object: self.object.clone(),
            field: field.to_string(),
            expected,
            dependency_id,
            reason: reason.to_string(),
        }
    }
}

/// Show a target-side reference (or list of them) in source vocabulary
pub fn reverse_target_reference_into_source(
    value: &Value,
    expected: ResourceType,
    reverse: &ReverseLookupTable,
    source_base_url: &str,
) -> Value {
    let single = |item: &Value| -> Value {
        match extract_id(item).and_then(|id| reverse.get(expected, id)) {
            Some(source_id) => render_reference(item, source_base_url, expected, source_id),
            None => unknown_reference(item),
        }
    };
    match value {
        Value::Null => Value::Null,
        Value::Array(items) => Value::Array(items.iter().map(single).collect()),
        other => single(other),
    }
}

/// Like `reverse_target_reference_into_source` when the resource type is not known
///
/// The type is taken from the URL when there is one, otherwise from the only
/// resource type the id maps back under.
pub fn reverse_unknown_reference_type(
    value: &Value,
    reverse: &ReverseLookupTable,
    source_base_url: &str,
) -> Value {
    let Some(target_id) = extract_id(value) else {
        return unknown_reference(value);
    };
    let from_url = value.as_str().and_then(|url| {
        let mut segments = url.trim_end_matches('/').rsplit('/');
        segments.next();
        segments.next().and_then(ResourceType::from_plural)
    });
    let resolved = match from_url {
        Some(resource_type) => reverse
            .get(resource_type, target_id)
            .map(|source_id| (resource_type, source_id)),
        None => match reverse.find_any(target_id).as_slice() {
            [single] => Some(*single),
            _ => None,
        },
    };
    match resolved {
        Some((resource_type, source_id)) => {
            render_reference(value, source_base_url, resource_type, source_id)
        }
        None => unknown_reference(value),
    }
}

fn parent_mut<'v, 'p>(
    payload: &'v mut Value,
    path: &'p str,
) -> Option<(&'v mut Map<String, Value>, &'p str)> {
    let (parent, key) = match path.rsplit_once('.') {
        Some((parent, key)) => (Some(parent), key),
        None => (None, path),
    };
    let mut node = payload;
    if let Some(parent) = parent {
        for segment in parent.split('.') {
            node = node.as_object_mut()?.get_mut(segment)?;
        }
    }
    Some((node.as_object_mut()?, key))
}

fn get_dotted<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .try_fold(value, |node, segment| node.as_object()?.get(segment))
}

fn dedup_references(items: &mut Vec<Value>) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.to_string()));
}
