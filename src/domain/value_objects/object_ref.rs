//! Object identity used in logs, errors and failure reports

use serde::{Deserialize, Serialize};

use super::ResourceType;

/// Integer id assigned by the remote API
pub type ObjectId = i64;

/// Enough identity (type/name/id) to locate a release object's snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub resource_type: ResourceType,
    pub id: ObjectId,
    pub name: String,
}

impl ObjectRef {
    pub fn new(resource_type: ResourceType, id: ObjectId, name: impl Into<String>) -> Self {
        Self {
            resource_type,
            id,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}' [{}]", self.resource_type, self.name, self.id)
    }
}

/// A single object's failure within a phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFailure {
    pub object: ObjectRef,
    pub message: String,
}

impl ObjectFailure {
    pub fn new(object: ObjectRef, message: impl Into<String>) -> Self {
        Self {
            object,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ObjectFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.object, self.message)
    }
}

/// Which way a release flows between the two environments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Source environment -> target environment
    #[default]
    Forward,
    /// Target environment -> source environment
    Reverse,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Reverse => write!(f, "reverse"),
        }
    }
}

/// Orchestrator phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initialize,
    PrepareTargets,
    OverrideReferences,
    Compare,
    FirstDeploy,
    SecondDeploy,
    PersistState,
    Revert,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initialize => "initialize",
            Phase::PrepareTargets => "prepare targets",
            Phase::OverrideReferences => "override references",
            Phase::Compare => "compare",
            Phase::FirstDeploy => "deploy (first pass)",
            Phase::SecondDeploy => "deploy (second pass)",
            Phase::PersistState => "persist state",
            Phase::Revert => "revert",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
