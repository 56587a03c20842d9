//! Release Result
//!
//! Plans, per-phase reports and run summaries.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::domain::services::{MergeConflict, PayloadDiff};
use crate::domain::value_objects::{ObjectFailure, ObjectId, ObjectRef, Phase};
use crate::error::{FerryError, FerryResult};

/// Failures collected while running one phase
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub phase: Phase,
    pub failures: Vec<ObjectFailure>,
}

impl PhaseReport {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            failures: Vec::new(),
        }
    }

    pub fn extend(&mut self, failures: impl IntoIterator<Item = ObjectFailure>) {
        for failure in failures {
            if !self.failures.iter().any(|f| f.object == failure.object) {
                self.failures.push(failure);
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// The aggregate error that stops the run
    pub fn into_result(self) -> FerryResult<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(FerryError::PhaseFailed {
                phase: self.phase,
                failures: self.failures,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Unchanged,
}

impl std::fmt::Display for PlanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanAction::Create => write!(f, "create"),
            PlanAction::Update => write!(f, "update"),
            PlanAction::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Drift of one target against its last applied state, in source vocabulary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetComparison {
    pub target_index: usize,
    pub target_id: ObjectId,
    pub rebase_candidates: BTreeMap<String, Value>,
    pub conflicts: BTreeMap<String, MergeConflict>,
    pub warnings: Vec<String>,
}

impl TargetComparison {
    pub fn has_drift(&self) -> bool {
        !self.rebase_candidates.is_empty() || !self.conflicts.is_empty()
    }
}

/// What happens to one target
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub object: ObjectRef,
    pub target_index: usize,
    pub target_id: Option<ObjectId>,
    pub action: PlanAction,
    /// Staged payload (placeholder ids for targets not created yet)
    pub payload: Value,
    pub diff: PayloadDiff,
    pub warnings: Vec<String>,
    pub comparison: Option<TargetComparison>,
}

#[derive(Debug, Clone, Default)]
pub struct ReleasePlan {
    pub entries: Vec<PlanEntry>,
}

impl ReleasePlan {
    pub fn count(&self, action: PlanAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.action != PlanAction::Unchanged)
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries
            .iter()
            .filter_map(|e| e.comparison.as_ref())
            .any(|c| !c.conflicts.is_empty())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update, {} unchanged",
            self.count(PlanAction::Create),
            self.count(PlanAction::Update),
            self.count(PlanAction::Unchanged)
        )
    }
}

/// Outcome of a successful apply
#[derive(Debug, Clone, Default)]
pub struct ReleaseResult {
    pub created: Vec<(ObjectRef, ObjectId)>,
    pub updated: Vec<(ObjectRef, ObjectId)>,
    pub unchanged: Vec<(ObjectRef, ObjectId)>,
    /// Deploy state entries written
    pub state_entries: usize,
    /// Manifest target ids that changed
    pub manifest_ids_changed: usize,
}

/// Outcome of a successful revert
#[derive(Debug, Clone, Default)]
pub struct RevertResult {
    pub deleted: Vec<(ObjectRef, ObjectId)>,
    /// Deploy state entries purged
    pub purged: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::ResourceType;

    #[test]
    fn report_without_failures_is_ok() {
        assert!(PhaseReport::new(Phase::Compare).into_result().is_ok());
    }

    #[test]
    fn report_keeps_one_failure_per_object() {
        let object = ObjectRef::new(ResourceType::Queue, 1, "q");
        let mut report = PhaseReport::new(Phase::FirstDeploy);
        report.extend([
            ObjectFailure::new(object.clone(), "first"),
            ObjectFailure::new(object, "second"),
        ]);
        match report.into_result() {
            Err(FerryError::PhaseFailed { failures, .. }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].message, "first");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
