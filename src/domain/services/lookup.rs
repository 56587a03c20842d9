//! Lookup tables
//!
//! `LookupTable` maps a source id to its target slots per resource type and is
//! used to resolve forward references. `ReverseLookupTable` maps target ids back
//! to source ids and is only used to show target-side values in source
//! vocabulary.
//!
//! Both are rebuilt between sequential steps and read-only while concurrent
//! work is in flight.

use std::collections::HashMap;

use crate::domain::entities::ReleaseObject;
use crate::domain::value_objects::{ObjectId, ResourceType};

/// One target of a source object, as seen by referencing objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSlot {
    pub index: usize,
    pub id: Option<ObjectId>,
    /// The owning object failed, so a missing id will never appear
    pub owner_failed: bool,
}

/// Outcome of picking one candidate for a referencing target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    /// Candidate count equals the referencing object's target count (N:N)
    Paired(TargetSlot),
    /// All referencing targets share one candidate (N:1); `candidates` > 1 is suspicious
    Shared { slot: TargetSlot, candidates: usize },
}

impl Pick {
    pub fn slot(&self) -> TargetSlot {
        match self {
            Pick::Paired(slot) => *slot,
            Pick::Shared { slot, .. } => *slot,
        }
    }
}

/// Choose the dependency target for target `target_index` of `target_count`
pub fn pick_candidate(
    candidates: &[TargetSlot],
    target_index: usize,
    target_count: usize,
) -> Option<Pick> {
    if candidates.is_empty() {
        return None;
    }
    if candidates.len() == target_count {
        return candidates.get(target_index).copied().map(Pick::Paired);
    }
    Some(Pick::Shared {
        slot: candidates[0],
        candidates: candidates.len(),
    })
}

/// source id -> resource type -> ordered target slots
#[derive(Debug, Clone, Default)]
pub struct LookupTable {
    entries: HashMap<ObjectId, HashMap<ResourceType, Vec<TargetSlot>>>,
}

impl LookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every object (children included) by id, type and targets
    pub fn build<'a>(objects: impl IntoIterator<Item = &'a ReleaseObject>) -> Self {
        let mut table = Self::new();
        for object in objects.into_iter().flat_map(|o| o.walk()) {
            let failed = object.failed();
            let slots = object
                .targets
                .iter()
                .map(|t| TargetSlot {
                    index: t.index,
                    id: t.id,
                    owner_failed: failed,
                })
                .collect();
            table.insert(object.resource_type(), object.id(), slots);
        }
        table
    }

    pub fn insert(&mut self, resource_type: ResourceType, source_id: ObjectId, slots: Vec<TargetSlot>) {
        self.entries
            .entry(source_id)
            .or_default()
            .insert(resource_type, slots);
    }

    /// Target slots of `source_id` for `resource_type`
    pub fn candidates(&self, source_id: ObjectId, resource_type: ResourceType) -> &[TargetSlot] {
        self.entries
            .get(&source_id)
            .and_then(|types| types.get(&resource_type))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether `source_id` is a released object of `resource_type` (even with zero targets)
    pub fn is_known(&self, source_id: ObjectId, resource_type: ResourceType) -> bool {
        self.entries
            .get(&source_id)
            .is_some_and(|types| types.contains_key(&resource_type))
    }

    /// Resource types under which `source_id` has at least one target
    pub fn types_with_targets(&self, source_id: ObjectId) -> Vec<ResourceType> {
        let mut types: Vec<ResourceType> = self
            .entries
            .get(&source_id)
            .map(|types| {
                types
                    .iter()
                    .filter(|(_, slots)| !slots.is_empty())
                    .map(|(ty, _)| *ty)
                    .collect()
            })
            .unwrap_or_default();
        types.sort();
        types
    }

    pub fn contains(&self, source_id: ObjectId) -> bool {
        self.entries.contains_key(&source_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Derive the reverse table (target id -> source id per type)
    pub fn reverse(&self) -> ReverseLookupTable {
        let mut reverse = ReverseLookupTable::default();
        for (source_id, types) in &self.entries {
            for (resource_type, slots) in types {
                for slot in slots {
                    if let Some(target_id) = slot.id {
                        reverse
                            .entries
                            .entry(*resource_type)
                            .or_default()
                            .insert(target_id, *source_id);
                    }
                }
            }
        }
        reverse
    }
}

/// resource type -> target id -> source id
#[derive(Debug, Clone, Default)]
pub struct ReverseLookupTable {
    entries: HashMap<ResourceType, HashMap<ObjectId, ObjectId>>,
}

impl ReverseLookupTable {
    pub fn get(&self, resource_type: ResourceType, target_id: ObjectId) -> Option<ObjectId> {
        self.entries.get(&resource_type)?.get(&target_id).copied()
    }

    /// Every (type, source id) a target id maps back to
    pub fn find_any(&self, target_id: ObjectId) -> Vec<(ResourceType, ObjectId)> {
        let mut found: Vec<_> = self
            .entries
            .iter()
            .filter_map(|(ty, ids)| ids.get(&target_id).map(|source| (*ty, *source)))
            .collect();
        found.sort();
        found
    }
}
