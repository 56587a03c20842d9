//! Resource type value object - the closed set of releasable remote resources

use serde::{Deserialize, Serialize};

/// Kind of remote resource a release object represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Organization,
    Workspace,
    Queue,
    Schema,
    Inbox,
    Hook,
    Label,
    EmailTemplate,
    Rule,
    RuleTemplate,
    Engine,
    EngineField,
}

impl ResourceType {
    pub const ALL: [ResourceType; 12] = [
        ResourceType::Organization,
        ResourceType::Workspace,
        ResourceType::Queue,
        ResourceType::Schema,
        ResourceType::Inbox,
        ResourceType::Hook,
        ResourceType::Label,
        ResourceType::EmailTemplate,
        ResourceType::Rule,
        ResourceType::RuleTemplate,
        ResourceType::Engine,
        ResourceType::EngineField,
    ];

    /// Plural name used for API path segments and deploy state buckets
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceType::Organization => "organizations",
            ResourceType::Workspace => "workspaces",
            ResourceType::Queue => "queues",
            ResourceType::Schema => "schemas",
            ResourceType::Inbox => "inboxes",
            ResourceType::Hook => "hooks",
            ResourceType::Label => "labels",
            ResourceType::EmailTemplate => "email_templates",
            ResourceType::Rule => "rules",
            ResourceType::RuleTemplate => "rule_templates",
            ResourceType::Engine => "engines",
            ResourceType::EngineField => "engine_fields",
        }
    }

    /// Inverse of [`ResourceType::plural`]
    pub fn from_plural(plural: &str) -> Option<ResourceType> {
        Self::ALL.into_iter().find(|ty| ty.plural() == plural)
    }

    /// Human-readable singular name
    pub fn display_name(&self) -> &'static str {
        match self {
            ResourceType::Organization => "organization",
            ResourceType::Workspace => "workspace",
            ResourceType::Queue => "queue",
            ResourceType::Schema => "schema",
            ResourceType::Inbox => "inbox",
            ResourceType::Hook => "hook",
            ResourceType::Label => "label",
            ResourceType::EmailTemplate => "email template",
            ResourceType::Rule => "rule",
            ResourceType::RuleTemplate => "rule template",
            ResourceType::Engine => "engine",
            ResourceType::EngineField => "engine field",
        }
    }

    /// The composite type that always owns this type, if any
    pub fn owner(&self) -> Option<ResourceType> {
        match self {
            ResourceType::Schema | ResourceType::Inbox | ResourceType::EmailTemplate => {
                Some(ResourceType::Queue)
            }
            ResourceType::Rule => Some(ResourceType::Schema),
            ResourceType::EngineField => Some(ResourceType::Engine),
            _ => None,
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.owner().is_none()
    }

    /// Whether a failure of this child fails its owner
    ///
    /// A queue cannot exist without its schema and inbox; templates, rules and
    /// engine fields fail on their own.
    pub fn is_required_child(&self) -> bool {
        matches!(self, ResourceType::Schema | ResourceType::Inbox)
    }

    /// Organizations are never created or deleted, only patched
    pub fn is_update_only(&self) -> bool {
        matches!(self, ResourceType::Organization)
    }

    /// Top-level deploy order (dependencies first)
    pub fn deploy_rank(&self) -> usize {
        match self {
            ResourceType::Organization => 0,
            ResourceType::Workspace => 1,
            ResourceType::Engine => 2,
            ResourceType::EngineField => 3,
            ResourceType::Label => 4,
            ResourceType::RuleTemplate => 5,
            ResourceType::Schema => 6,
            ResourceType::Queue => 7,
            ResourceType::Inbox => 8,
            ResourceType::EmailTemplate => 9,
            ResourceType::Rule => 10,
            ResourceType::Hook => 11,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
