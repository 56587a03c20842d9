//! Release manifest entity
//!
//! Enumerates, per resource type, the source objects to release and their
//! target lists. Target ids of created objects are written back into it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ReleaseObject, Target};
use crate::domain::value_objects::{ObjectId, ResourceType};
use crate::error::{FerryError, FerryResult};

/// One target of a manifest entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestTarget {
    #[serde(default)]
    pub id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attribute_override: Map<String, Value>,
}

impl ManifestTarget {
    pub fn new(id: Option<ObjectId>) -> Self {
        Self {
            id,
            attribute_override: Map::new(),
        }
    }
}

/// One source object to release
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: ObjectId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub targets: Vec<ManifestTarget>,
}

impl ManifestEntry {
    pub fn new(id: ObjectId, name: impl Into<String>, targets: Vec<ManifestTarget>) -> Self {
        Self {
            id,
            name: name.into(),
            targets,
        }
    }

    fn to_object(&self, resource_type: ResourceType) -> ReleaseObject {
        let targets = self
            .targets
            .iter()
            .enumerate()
            .map(|(index, t)| Target::new(index, t.id).with_override(t.attribute_override.clone()))
            .collect();
        ReleaseObject::new(resource_type, self.id, self.name.clone()).with_targets(targets)
    }
}

/// A queue and the objects it owns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    #[serde(flatten)]
    pub entry: ManifestEntry,
    pub schema: ManifestEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbox: Option<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub email_templates: Vec<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<ManifestEntry>,
}

/// An engine and its fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineEntry {
    #[serde(flatten)]
    pub entry: ManifestEntry,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<ManifestEntry>,
}

/// Declarative description of a release
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workspaces: Vec<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub engines: Vec<EngineEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_templates: Vec<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queues: Vec<QueueEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<ManifestEntry>,
}

/// Target ids keyed by `(type, source id)`, in target order
pub type TargetIds = HashMap<(ResourceType, ObjectId), Vec<Option<ObjectId>>>;

impl Manifest {
    /// Build the release object tree, leaves first within each composite
    pub fn to_release_objects(&self) -> FerryResult<Vec<ReleaseObject>> {
        let mut objects = Vec::new();

        if let Some(org) = &self.organization {
            if org.targets.iter().any(|t| t.id.is_none()) {
                return Err(FerryError::InvalidManifest(format!(
                    "organization {} cannot be created; every target needs an id",
                    org.id
                )));
            }
            objects.push(org.to_object(ResourceType::Organization));
        }

        objects.extend(self.workspaces.iter().map(|e| e.to_object(ResourceType::Workspace)));

        for engine in &self.engines {
            let mut object = engine.entry.to_object(ResourceType::Engine);
            for field in &engine.fields {
                object.children.push(field.to_object(ResourceType::EngineField));
            }
            objects.push(object);
        }

        objects.extend(self.labels.iter().map(|e| e.to_object(ResourceType::Label)));
        objects.extend(
            self.rule_templates
                .iter()
                .map(|e| e.to_object(ResourceType::RuleTemplate)),
        );

        for queue in &self.queues {
            let mut schema = queue.schema.to_object(ResourceType::Schema);
            for rule in &queue.rules {
                schema.children.push(rule.to_object(ResourceType::Rule));
            }
            let mut object = queue.entry.to_object(ResourceType::Queue);
            object.children.push(schema);
            if let Some(inbox) = &queue.inbox {
                object.children.push(inbox.to_object(ResourceType::Inbox));
            }
            for template in &queue.email_templates {
                object
                    .children
                    .push(template.to_object(ResourceType::EmailTemplate));
            }
            objects.push(object);
        }

        objects.extend(self.hooks.iter().map(|e| e.to_object(ResourceType::Hook)));

        for object in &objects {
            object.validate_cardinality()?;
        }
        Ok(objects)
    }

    /// Visit every entry with its resource type
    pub fn entries_mut(&mut self) -> Vec<(ResourceType, &mut ManifestEntry)> {
        let mut out: Vec<(ResourceType, &mut ManifestEntry)> = Vec::new();
        if let Some(org) = self.organization.as_mut() {
            out.push((ResourceType::Organization, org));
        }
        out.extend(self.workspaces.iter_mut().map(|e| (ResourceType::Workspace, e)));
        for engine in &mut self.engines {
            out.push((ResourceType::Engine, &mut engine.entry));
            out.extend(engine.fields.iter_mut().map(|e| (ResourceType::EngineField, e)));
        }
        out.extend(self.labels.iter_mut().map(|e| (ResourceType::Label, e)));
        out.extend(
            self.rule_templates
                .iter_mut()
                .map(|e| (ResourceType::RuleTemplate, e)),
        );
        for queue in &mut self.queues {
            out.push((ResourceType::Queue, &mut queue.entry));
            out.push((ResourceType::Schema, &mut queue.schema));
            if let Some(inbox) = queue.inbox.as_mut() {
                out.push((ResourceType::Inbox, inbox));
            }
            out.extend(
                queue
                    .email_templates
                    .iter_mut()
                    .map(|e| (ResourceType::EmailTemplate, e)),
            );
            out.extend(queue.rules.iter_mut().map(|e| (ResourceType::Rule, e)));
        }
        out.extend(self.hooks.iter_mut().map(|e| (ResourceType::Hook, e)));
        out
    }

    /// Write target ids back in place; returns how many ids changed
    pub fn apply_target_ids(&mut self, ids: &TargetIds) -> usize {
        let mut changed = 0;
        for (resource_type, entry) in self.entries_mut() {
            let Some(target_ids) = ids.get(&(resource_type, entry.id)) else {
                continue;
            };
            for (target, id) in entry.targets.iter_mut().zip(target_ids) {
                if target.id != *id {
                    target.id = *id;
                    changed += 1;
                }
            }
        }
        changed
    }
}

/// Collect current target ids from a release object tree
pub fn collect_target_ids(objects: &[ReleaseObject]) -> TargetIds {
    let mut ids = TargetIds::new();
    for object in objects.iter().flat_map(|o| o.walk()) {
        ids.insert(
            (object.resource_type(), object.id()),
            object.targets.iter().map(|t| t.id).collect(),
        );
    }
    ids
}
