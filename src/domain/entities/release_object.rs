//! Release object entity - one source-environment resource to be released
//!
//! A release object owns 0..N targets (destinations). Its source payload is
//! read once during initialization and never mutated in place; every
//! transformation happens on the per-target payload snapshots.

use serde_json::{Map, Value};

use crate::domain::value_objects::{ObjectId, ObjectRef, ResourceType};
use crate::error::{FerryError, FerryResult};

/// One destination of a release object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Target {
    /// Remote id; `None` means the target must be created
    pub id: Option<ObjectId>,
    /// Position among sibling targets (used for N:N pairing)
    pub index: usize,
    /// Explicit per-target overrides (`path query -> value`)
    pub attribute_override: Map<String, Value>,
    /// Target-specific payload before references are rewritten
    pub pre_reference_replace_data: Option<Value>,
    /// Payload rendered for the plan (placeholder references allowed)
    pub visualized_plan_data: Option<Value>,
    /// Payload sent in the first apply pass
    pub first_deploy_data: Option<Value>,
    /// Payload after re-resolving references with real ids
    pub second_deploy_data: Option<Value>,
    /// Remote object as fetched during comparison
    pub remote_data: Option<Value>,
    /// Payload successfully applied in this run
    pub last_applied_data: Option<Value>,
    /// Whether this run created the target
    pub created: bool,
    /// Whether this run sent an update for the target
    pub updated: bool,
    /// A create or update call for this target failed in this run
    pub deploy_failed: bool,
    /// Reference warnings raised while staging the latest payload
    pub warnings: Vec<String>,
}

impl Target {
    pub fn new(index: usize, id: Option<ObjectId>) -> Self {
        Self {
            id,
            index,
            ..Self::default()
        }
    }

    pub fn with_override(mut self, attribute_override: Map<String, Value>) -> Self {
        self.attribute_override = attribute_override;
        self
    }

    pub fn exists_on_remote(&self) -> bool {
        self.id.is_some()
    }

    /// Drop every payload snapshot (used when the object is re-initialized)
    pub fn reset_payloads(&mut self) {
        self.pre_reference_replace_data = None;
        self.visualized_plan_data = None;
        self.first_deploy_data = None;
        self.second_deploy_data = None;
        self.warnings.clear();
    }

    /// The most recent payload produced by the pipeline
    pub fn latest_payload(&self) -> Option<&Value> {
        self.second_deploy_data
            .as_ref()
            .or(self.first_deploy_data.as_ref())
            .or(self.visualized_plan_data.as_ref())
    }
}

/// A releasable resource and its owned children
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseObject {
    id: ObjectId,
    name: String,
    resource_type: ResourceType,
    data: Option<Value>,
    pub targets: Vec<Target>,
    pub children: Vec<ReleaseObject>,
    pub ignored_attributes: Vec<String>,
    pub derived_fields: Vec<String>,
    pub initialize_failed: bool,
    pub deploy_failed: bool,
    pub revert_failed: bool,
    pub conflict_detected: bool,
    pub rebase_detected: bool,
}

impl ReleaseObject {
    pub fn new(resource_type: ResourceType, id: ObjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            resource_type,
            data: None,
            targets: Vec::new(),
            children: Vec::new(),
            ignored_attributes: Vec::new(),
            derived_fields: Vec::new(),
            initialize_failed: false,
            deploy_failed: false,
            revert_failed: false,
            conflict_detected: false,
            rebase_detected: false,
        }
    }

    pub fn with_targets(mut self, targets: Vec<Target>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_child(mut self, child: ReleaseObject) -> Self {
        self.children.push(child);
        self
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.resource_type, self.id, self.name.clone())
    }

    /// Source payload; `None` before initialization
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Install the source payload read from the snapshot store
    pub fn initialize(&mut self, data: Value) {
        if let Some(name) = data.get("name").and_then(Value::as_str) {
            if self.name.is_empty() {
                self.name = name.to_string();
            }
        }
        self.data = Some(data);
        self.initialize_failed = false;
        for target in &mut self.targets {
            target.reset_payloads();
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.data.is_some()
    }

    /// Whether any phase failed for this object
    pub fn failed(&self) -> bool {
        self.initialize_failed || self.deploy_failed
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// This object followed by all descendants, depth first
    pub fn walk(&self) -> Vec<&ReleaseObject> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }

    /// Apply `f` to this object and every descendant, depth first
    pub fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut ReleaseObject)) {
        f(self);
        for child in &mut self.children {
            child.for_each_mut(f);
        }
    }

    /// Child-index paths of this object and every descendant, depth first
    pub fn node_paths(&self) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new()];
        for (i, child) in self.children.iter().enumerate() {
            for mut path in child.node_paths() {
                path.insert(0, i);
                out.push(path);
            }
        }
        out
    }

    pub fn node(&self, path: &[usize]) -> Option<&ReleaseObject> {
        path.iter()
            .try_fold(self, |node, &i| node.children.get(i))
    }

    pub fn node_mut(&mut self, path: &[usize]) -> Option<&mut ReleaseObject> {
        path.iter()
            .try_fold(self, |node, &i| node.children.get_mut(i))
    }

    /// Detach every descendant into a flat list, this object first
    pub fn into_flat(mut self) -> Vec<ReleaseObject> {
        let children = std::mem::take(&mut self.children);
        let mut out = vec![self];
        for child in children {
            out.extend(child.into_flat());
        }
        out
    }

    pub fn find(&self, resource_type: ResourceType, id: ObjectId) -> Option<&ReleaseObject> {
        self.walk()
            .into_iter()
            .find(|o| o.resource_type == resource_type && o.id == id)
    }

    /// Check that every node of a composite shares the owner's target count
    pub fn validate_cardinality(&self) -> FerryResult<()> {
        let expected = self.targets.len();
        for child in &self.children {
            if child.targets.len() != expected {
                return Err(FerryError::Cardinality {
                    object: self.object_ref(),
                    child: child.object_ref(),
                    expected,
                    found: child.targets.len(),
                });
            }
            child.validate_cardinality()?;
        }
        Ok(())
    }

    /// Source ids of required children that failed
    pub fn failed_required_children(&self) -> Vec<ObjectRef> {
        self.children
            .iter()
            .filter(|c| c.resource_type.is_required_child() && c.failed())
            .map(|c| c.object_ref())
            .collect()
    }
}
