//! Deploy state entity - last-applied configuration per (type, source, target)
//!
//! The deploy state is the `last applied` input of the three-way merge. It is a
//! pure data structure - I/O is handled by DeployStateRepository.
//!
//! Entries are written only for targets whose deploy succeeded and are never
//! removed implicitly; `purge` is the only way to drop one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::ReleaseObject;
use crate::domain::value_objects::{Direction, ObjectId, ResourceType};

/// Last applied payloads of one (source, target) pair
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LastApplied {
    pub forward: Option<Value>,
    pub reverse: Option<Value>,
    /// Dotted paths owned by the target side
    pub derived_fields: Vec<String>,
}

impl LastApplied {
    pub fn get(&self, direction: Direction) -> Option<&Value> {
        match direction {
            Direction::Forward => self.forward.as_ref(),
            Direction::Reverse => self.reverse.as_ref(),
        }
    }

    fn set(&mut self, direction: Direction, data: Value) {
        match direction {
            Direction::Forward => self.forward = Some(data),
            Direction::Reverse => self.reverse = Some(data),
        }
    }
}

/// State of one deployment of a source object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentEntry {
    pub last_applied: LastApplied,
    pub deployed_at: Option<DateTime<Utc>>,
}

/// All deployments of one source object, keyed by target id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceDeployments {
    pub deployments: BTreeMap<ObjectId, DeploymentEntry>,
}

/// Key under which a (object, target) pair is stored.
///
/// State is always keyed in forward orientation; a reverse release swaps the
/// roles of the two ids.
pub fn state_key(direction: Direction, object_id: ObjectId, target_id: ObjectId) -> (ObjectId, ObjectId) {
    match direction {
        Direction::Forward => (object_id, target_id),
        Direction::Reverse => (target_id, object_id),
    }
}

/// The deploy state document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployState {
    buckets: BTreeMap<ResourceType, BTreeMap<ObjectId, ResourceDeployments>>,
}

impl DeployState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buckets(&self) -> &BTreeMap<ResourceType, BTreeMap<ObjectId, ResourceDeployments>> {
        &self.buckets
    }

    pub fn entry(
        &self,
        resource_type: ResourceType,
        source_id: ObjectId,
        target_id: ObjectId,
    ) -> Option<&DeploymentEntry> {
        self.buckets
            .get(&resource_type)?
            .get(&source_id)?
            .deployments
            .get(&target_id)
    }

    pub fn get_last_applied(
        &self,
        resource_type: ResourceType,
        source_id: ObjectId,
        target_id: ObjectId,
        direction: Direction,
    ) -> Option<&Value> {
        self.entry(resource_type, source_id, target_id)?
            .last_applied
            .get(direction)
    }

    /// Insert or replace one entry
    pub fn set_entry(
        &mut self,
        resource_type: ResourceType,
        source_id: ObjectId,
        target_id: ObjectId,
        entry: DeploymentEntry,
    ) {
        self.buckets
            .entry(resource_type)
            .or_default()
            .entry(source_id)
            .or_default()
            .deployments
            .insert(target_id, entry);
    }

    /// Record a successful deploy of one (source, target) pair
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        resource_type: ResourceType,
        source_id: ObjectId,
        target_id: ObjectId,
        direction: Direction,
        data: Value,
        derived_fields: Vec<String>,
        deployed_at: DateTime<Utc>,
    ) {
        let entry = self
            .buckets
            .entry(resource_type)
            .or_default()
            .entry(source_id)
            .or_default()
            .deployments
            .entry(target_id)
            .or_default();
        entry.last_applied.set(direction, data);
        entry.last_applied.derived_fields = derived_fields;
        entry.deployed_at = Some(deployed_at);
    }

    /// Record every successfully deployed target of `objects`; returns the entry count written
    ///
    /// Targets are recorded one by one, so a failed sibling target does not
    /// hide a target that did deploy.
    pub fn update(
        &mut self,
        objects: &[ReleaseObject],
        direction: Direction,
        deployed_at: DateTime<Utc>,
    ) -> usize {
        let mut written = 0;
        for object in objects.iter().flat_map(|o| o.walk()) {
            for target in object.targets.iter().filter(|t| !t.deploy_failed) {
                let (Some(target_id), Some(data)) = (target.id, target.last_applied_data.as_ref())
                else {
                    continue;
                };
                let (source_id, target_id) = state_key(direction, object.id(), target_id);
                self.record(
                    object.resource_type(),
                    source_id,
                    target_id,
                    direction,
                    data.clone(),
                    object.derived_fields.clone(),
                    deployed_at,
                );
                written += 1;
            }
        }
        written
    }

    /// Explicitly drop every deployment of a source object
    pub fn purge(&mut self, resource_type: ResourceType, source_id: ObjectId) -> bool {
        let removed = self
            .buckets
            .get_mut(&resource_type)
            .and_then(|bucket| bucket.remove(&source_id))
            .is_some();
        self.drop_empty_bucket(resource_type);
        removed
    }

    /// Explicitly drop one deployment of a source object
    pub fn purge_target(
        &mut self,
        resource_type: ResourceType,
        source_id: ObjectId,
        target_id: ObjectId,
    ) -> bool {
        let Some(bucket) = self.buckets.get_mut(&resource_type) else {
            return false;
        };
        let removed = match bucket.get_mut(&source_id) {
            Some(resource) => {
                let removed = resource.deployments.remove(&target_id).is_some();
                if resource.deployments.is_empty() {
                    bucket.remove(&source_id);
                }
                removed
            }
            None => false,
        };
        self.drop_empty_bucket(resource_type);
        removed
    }

    fn drop_empty_bucket(&mut self, resource_type: ResourceType) {
        if self
            .buckets
            .get(&resource_type)
            .is_some_and(|bucket| bucket.is_empty())
        {
            self.buckets.remove(&resource_type);
        }
    }

    /// Total number of deployment entries
    pub fn len(&self) -> usize {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.values())
            .map(|resource| resource.deployments.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Target;
    use serde_json::json;

    fn deployed_queue(failed: bool) -> ReleaseObject {
        let mut target = Target::new(0, Some(55));
        target.last_applied_data = Some(json!({"name": "Invoices"}));
        target.deploy_failed = failed;
        let mut pending = Target::new(1, None);
        pending.last_applied_data = Some(json!({"name": "never created"}));
        let mut object = ReleaseObject::new(ResourceType::Queue, 10, "Invoices")
            .with_targets(vec![target, pending]);
        object.deploy_failed = failed;
        object
    }

    #[test]
    fn update_records_only_deployed_targets() {
        let mut state = DeployState::new();
        let written = state.update(&[deployed_queue(false)], Direction::Forward, Utc::now());

        assert_eq!(written, 1);
        assert_eq!(
            state.get_last_applied(ResourceType::Queue, 10, 55, Direction::Forward),
            Some(&json!({"name": "Invoices"}))
        );
        assert_eq!(
            state.get_last_applied(ResourceType::Queue, 10, 55, Direction::Reverse),
            None
        );
    }

    #[test]
    fn failed_deploy_keeps_previous_entry() {
        let mut state = DeployState::new();
        state.record(
            ResourceType::Queue,
            10,
            55,
            Direction::Forward,
            json!({"name": "old"}),
            vec![],
            Utc::now(),
        );

        let written = state.update(&[deployed_queue(true)], Direction::Forward, Utc::now());

        assert_eq!(written, 0);
        assert_eq!(
            state.get_last_applied(ResourceType::Queue, 10, 55, Direction::Forward),
            Some(&json!({"name": "old"}))
        );
    }

    #[test]
    fn deployed_target_is_recorded_next_to_a_failed_sibling() {
        let mut created = Target::new(0, Some(55));
        created.last_applied_data = Some(json!({"name": "Invoices"}));
        let mut rejected = Target::new(1, Some(56));
        rejected.deploy_failed = true;
        let mut object = ReleaseObject::new(ResourceType::Queue, 10, "Invoices")
            .with_targets(vec![created, rejected]);
        object.deploy_failed = true;

        let written = state_after(&[object]);

        assert_eq!(written.len(), 1);
        assert!(written
            .get_last_applied(ResourceType::Queue, 10, 55, Direction::Forward)
            .is_some());
        assert!(written
            .get_last_applied(ResourceType::Queue, 10, 56, Direction::Forward)
            .is_none());
    }

    fn state_after(objects: &[ReleaseObject]) -> DeployState {
        let mut state = DeployState::new();
        state.update(objects, Direction::Forward, Utc::now());
        state
    }

    #[test]
    fn reverse_direction_uses_swapped_key() {
        let mut state = DeployState::new();
        state.update(&[deployed_queue(false)], Direction::Reverse, Utc::now());
        assert!(state
            .get_last_applied(ResourceType::Queue, 55, 10, Direction::Reverse)
            .is_some());
    }

    #[test]
    fn purge_is_explicit() {
        let mut state = DeployState::new();
        state.update(&[deployed_queue(false)], Direction::Forward, Utc::now());
        assert!(!state.is_empty());

        assert!(state.purge_target(ResourceType::Queue, 10, 55));
        assert!(state.is_empty());
        assert!(state.buckets().is_empty());
        assert!(!state.purge(ResourceType::Queue, 10));
    }
}
