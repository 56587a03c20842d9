//! Resource strategies
//!
//! One strategy per `ResourceType`. The orchestrator only talks to this
//! interface; everything resource-specific (read-only fields, reference
//! fields, composite wiring, deletion mode) lives here.

use serde_json::{Map, Value};

use crate::domain::services::{
    HookGraph, MissingPolicy, ReferenceField, ReferenceReplacer,
};
use crate::domain::value_objects::{reference_url, ObjectId, ResourceType};
use crate::error::FerryResult;

/// Fields the remote API manages itself; never sent and never compared
pub const COMMON_READ_ONLY_FIELDS: &[&str] = &[
    "id",
    "url",
    "modified_at",
    "modified_by",
    "created_at",
    "created_by",
];

/// How a target of this type disappears on delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Immediate,
    /// Deleted asynchronously; poll until the API returns 404
    Polled,
}

/// Ids created earlier in the same composite deploy, for one target index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositeLinks {
    pub queue: Option<ObjectId>,
    pub schema: Option<ObjectId>,
    pub engine: Option<ObjectId>,
}

pub trait ResourceStrategy: Send + Sync {
    fn resource_type(&self) -> ResourceType;

    /// Type-specific read-only fields (on top of `COMMON_READ_ONLY_FIELDS`)
    fn read_only_fields(&self) -> &'static [&'static str] {
        &[]
    }

    fn reference_fields(&self) -> &'static [ReferenceField] {
        &[]
    }

    /// Subtrees scanned for ids embedded in free text
    fn free_text_fields(&self) -> &'static [&'static str] {
        &[]
    }

    fn deletion(&self) -> Deletion {
        Deletion::Immediate
    }

    /// Copy of the source payload without ignored fields
    fn prepare_target_payload(&self, data: &Value, ignored: &[String]) -> Value {
        let mut payload = data.clone();
        for path in ignored {
            remove_dotted(&mut payload, path);
        }
        payload
    }

    /// Rewrite every reference of a staged payload
    fn override_references(
        &self,
        replacer: &mut ReferenceReplacer<'_>,
        payload: &mut Value,
        remote: Option<&Value>,
        _hooks: &HookGraph,
    ) -> FerryResult<()> {
        replacer.apply_fields(payload, self.reference_fields(), remote)?;
        for subtree in self.free_text_fields() {
            replacer.replace_free_text(payload, subtree)?;
        }
        Ok(())
    }

    /// Point a composite member at the owners created for the same target
    fn wire(&self, _payload: &mut Value, _links: &CompositeLinks, _base_url: &str) {}
}

/// Strategy of a resource type
pub fn strategy_for(resource_type: ResourceType) -> &'static dyn ResourceStrategy {
    match resource_type {
        ResourceType::Organization => &OrganizationStrategy,
        ResourceType::Workspace => &WorkspaceStrategy,
        ResourceType::Queue => &QueueStrategy,
        ResourceType::Schema => &SchemaStrategy,
        ResourceType::Inbox => &InboxStrategy,
        ResourceType::Hook => &HookStrategy,
        ResourceType::Label => &LabelStrategy,
        ResourceType::EmailTemplate => &EmailTemplateStrategy,
        ResourceType::Rule => &RuleStrategy,
        ResourceType::RuleTemplate => &RuleTemplateStrategy,
        ResourceType::Engine => &EngineStrategy,
        ResourceType::EngineField => &EngineFieldStrategy,
    }
}

/// Every field never sent for `resource_type`, before configured extras
pub fn default_ignored_fields(resource_type: ResourceType) -> Vec<String> {
    COMMON_READ_ONLY_FIELDS
        .iter()
        .chain(strategy_for(resource_type).read_only_fields())
        .map(|s| s.to_string())
        .collect()
}

fn remove_dotted(value: &mut Value, path: &str) {
    let (parent, key) = match path.rsplit_once('.') {
        Some((parent, key)) => (Some(parent), key),
        None => (None, path),
    };
    let mut node = value;
    if let Some(parent) = parent {
        for segment in parent.split('.') {
            match node.as_object_mut().and_then(|o| o.get_mut(segment)) {
                Some(next) => node = next,
                None => return,
            }
        }
    }
    if let Some(object) = node.as_object_mut() {
        object.remove(key);
    }
}

fn set_field(payload: &mut Value, key: &str, value: Value) {
    if let Some(object) = payload.as_object_mut() {
        object.insert(key.to_string(), value);
    }
}

const ORGANIZATION_REF: ReferenceField =
    ReferenceField::single("organization", ResourceType::Organization);

pub struct OrganizationStrategy;

impl ResourceStrategy for OrganizationStrategy {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Organization
    }

    fn read_only_fields(&self) -> &'static [&'static str] {
        &["users", "workspaces", "trial_expires_at", "is_trial"]
    }
}

pub struct WorkspaceStrategy;

impl ResourceStrategy for WorkspaceStrategy {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Workspace
    }

    fn read_only_fields(&self) -> &'static [&'static str] {
        &["queues"]
    }

    fn reference_fields(&self) -> &'static [ReferenceField] {
        &[ORGANIZATION_REF]
    }
}

pub struct QueueStrategy;

impl ResourceStrategy for QueueStrategy {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Queue
    }

    fn read_only_fields(&self) -> &'static [&'static str] {
        &["counts", "users", "status", "session_timeout"]
    }

    fn reference_fields(&self) -> &'static [ReferenceField] {
        const FIELDS: &[ReferenceField] = &[
            ReferenceField::single("workspace", ResourceType::Workspace),
            ReferenceField::single("schema", ResourceType::Schema),
            ReferenceField::single("inbox", ResourceType::Inbox)
                .with_policy(MissingPolicy::OmitField),
            ReferenceField::list("hooks", ResourceType::Hook)
                .with_policy(MissingPolicy::OmitField)
                .keeping_target_only(),
            ReferenceField::list("webhooks", ResourceType::Hook)
                .with_policy(MissingPolicy::OmitField)
                .keeping_target_only(),
            ReferenceField::single("dedicated_engine", ResourceType::Engine)
                .with_policy(MissingPolicy::OmitField),
            ReferenceField::single("generic_engine", ResourceType::Engine)
                .with_policy(MissingPolicy::OmitField),
        ];
        FIELDS
    }

    fn free_text_fields(&self) -> &'static [&'static str] {
        &["settings", "metadata"]
    }

    fn deletion(&self) -> Deletion {
        Deletion::Polled
    }

    fn wire(&self, payload: &mut Value, links: &CompositeLinks, base_url: &str) {
        if let Some(schema) = links.schema {
            set_field(
                payload,
                "schema",
                Value::String(reference_url(base_url, ResourceType::Schema, schema)),
            );
        }
    }
}

pub struct SchemaStrategy;

impl ResourceStrategy for SchemaStrategy {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Schema
    }

    fn read_only_fields(&self) -> &'static [&'static str] {
        &["queues"]
    }
}

pub struct InboxStrategy;

impl ResourceStrategy for InboxStrategy {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Inbox
    }

    fn read_only_fields(&self) -> &'static [&'static str] {
        &["email"]
    }

    fn reference_fields(&self) -> &'static [ReferenceField] {
        const FIELDS: &[ReferenceField] = &[ReferenceField::list("queues", ResourceType::Queue)];
        FIELDS
    }

    fn wire(&self, payload: &mut Value, links: &CompositeLinks, base_url: &str) {
        if let Some(queue) = links.queue {
            let url = reference_url(base_url, ResourceType::Queue, queue);
            set_field(payload, "queues", Value::Array(vec![Value::String(url)]));
        }
    }
}

pub struct HookStrategy;

impl ResourceStrategy for HookStrategy {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Hook
    }

    fn read_only_fields(&self) -> &'static [&'static str] {
        &["status", "extension_source"]
    }

    fn reference_fields(&self) -> &'static [ReferenceField] {
        const FIELDS: &[ReferenceField] = &[ReferenceField::list("queues", ResourceType::Queue)
            .with_policy(MissingPolicy::OmitField)
            .keeping_target_only()];
        FIELDS
    }

    fn free_text_fields(&self) -> &'static [&'static str] {
        &["settings"]
    }

    fn override_references(
        &self,
        replacer: &mut ReferenceReplacer<'_>,
        payload: &mut Value,
        remote: Option<&Value>,
        hooks: &HookGraph,
    ) -> FerryResult<()> {
        replacer.apply_fields(payload, self.reference_fields(), remote)?;
        replacer.replace_run_after(payload, "run_after", hooks)?;
        for subtree in self.free_text_fields() {
            replacer.replace_free_text(payload, subtree)?;
        }
        Ok(())
    }
}

pub struct LabelStrategy;

impl ResourceStrategy for LabelStrategy {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Label
    }

    fn reference_fields(&self) -> &'static [ReferenceField] {
        &[ORGANIZATION_REF]
    }
}

pub struct EmailTemplateStrategy;

impl ResourceStrategy for EmailTemplateStrategy {
    fn resource_type(&self) -> ResourceType {
        ResourceType::EmailTemplate
    }

    fn reference_fields(&self) -> &'static [ReferenceField] {
        const FIELDS: &[ReferenceField] =
            &[ReferenceField::single("queue", ResourceType::Queue)];
        FIELDS
    }

    fn wire(&self, payload: &mut Value, links: &CompositeLinks, base_url: &str) {
        if let Some(queue) = links.queue {
            set_field(
                payload,
                "queue",
                Value::String(reference_url(base_url, ResourceType::Queue, queue)),
            );
        }
    }
}

pub struct RuleStrategy;

impl ResourceStrategy for RuleStrategy {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Rule
    }

    fn reference_fields(&self) -> &'static [ReferenceField] {
        const FIELDS: &[ReferenceField] = &[
            ReferenceField::single("schema", ResourceType::Schema),
            ReferenceField::list("queues", ResourceType::Queue)
                .with_policy(MissingPolicy::OmitField),
            ReferenceField::single("rule_template", ResourceType::RuleTemplate)
                .with_policy(MissingPolicy::OmitField),
            ReferenceField::list("labels", ResourceType::Label)
                .with_policy(MissingPolicy::OmitField),
        ];
        FIELDS
    }

    fn free_text_fields(&self) -> &'static [&'static str] {
        &["actions"]
    }

    fn wire(&self, payload: &mut Value, links: &CompositeLinks, base_url: &str) {
        if let Some(schema) = links.schema {
            set_field(
                payload,
                "schema",
                Value::String(reference_url(base_url, ResourceType::Schema, schema)),
            );
        }
    }
}

pub struct RuleTemplateStrategy;

impl ResourceStrategy for RuleTemplateStrategy {
    fn resource_type(&self) -> ResourceType {
        ResourceType::RuleTemplate
    }

    fn reference_fields(&self) -> &'static [ReferenceField] {
        &[ORGANIZATION_REF]
    }
}

pub struct EngineStrategy;

impl ResourceStrategy for EngineStrategy {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Engine
    }

    fn read_only_fields(&self) -> &'static [&'static str] {
        &["training_queues"]
    }

    fn reference_fields(&self) -> &'static [ReferenceField] {
        &[ORGANIZATION_REF]
    }
}

pub struct EngineFieldStrategy;

impl ResourceStrategy for EngineFieldStrategy {
    fn resource_type(&self) -> ResourceType {
        ResourceType::EngineField
    }

    fn read_only_fields(&self) -> &'static [&'static str] {
        &["queues"]
    }

    fn reference_fields(&self) -> &'static [ReferenceField] {
        const FIELDS: &[ReferenceField] =
            &[ReferenceField::single("engine", ResourceType::Engine)];
        FIELDS
    }

    fn wire(&self, payload: &mut Value, links: &CompositeLinks, base_url: &str) {
        if let Some(engine) = links.engine {
            set_field(
                payload,
                "engine",
                Value::String(reference_url(base_url, ResourceType::Engine, engine)),
            );
        }
    }
}

/// Set `value` at a dotted path, creating objects on the way; `Null` removes the key
pub fn set_dotted(target: &mut Value, path: &str, value: Value) {
    let mut node = target;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let Some(object) = node.as_object_mut() else {
            return;
        };
        if segments.peek().is_none() {
            if value.is_null() {
                object.remove(segment);
            } else {
                object.insert(segment.to_string(), value);
            }
            return;
        }
        node = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}
