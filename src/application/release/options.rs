//! Release Options
//!
//! The explicit configuration value threaded through the release use case.

use std::collections::HashMap;
use std::time::Duration;

use crate::domain::value_objects::{Direction, ResourceType};

use super::strategy::default_ignored_fields;

/// Configuration of one release run
#[derive(Debug, Clone)]
pub struct ReleaseConfig {
    /// Maximum number of concurrent API calls
    pub concurrency: usize,
    /// Run the three-way comparison against the deploy state
    pub compare: bool,
    /// Source and target live in different organizations
    pub cross_org: bool,
    pub direction: Direction,
    /// Base URL of the source environment (used to show values in source vocabulary)
    pub source_base_url: String,
    /// Extra ignored fields per type, on top of the read-only ones
    pub ignored_attributes: HashMap<ResourceType, Vec<String>>,
    /// Extra ignored fields per type, applied only to cross-organization releases
    pub cross_org_ignored_attributes: HashMap<ResourceType, Vec<String>>,
    /// Fields owned by the target side, per type
    pub derived_fields: HashMap<ResourceType, Vec<String>>,
    pub queue_delete_poll_interval: Duration,
    pub queue_delete_max_attempts: u32,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            compare: true,
            cross_org: false,
            direction: Direction::Forward,
            source_base_url: String::new(),
            ignored_attributes: HashMap::new(),
            cross_org_ignored_attributes: HashMap::new(),
            derived_fields: HashMap::new(),
            queue_delete_poll_interval: Duration::from_secs(2),
            queue_delete_max_attempts: 30,
        }
    }
}

impl ReleaseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_compare(mut self, compare: bool) -> Self {
        self.compare = compare;
        self
    }

    pub fn with_cross_org(mut self, cross_org: bool) -> Self {
        self.cross_org = cross_org;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_source_base_url(mut self, url: impl Into<String>) -> Self {
        self.source_base_url = url.into();
        self
    }

    pub fn with_ignored(mut self, resource_type: ResourceType, fields: Vec<String>) -> Self {
        self.ignored_attributes.insert(resource_type, fields);
        self
    }

    pub fn with_derived(mut self, resource_type: ResourceType, fields: Vec<String>) -> Self {
        self.derived_fields.insert(resource_type, fields);
        self
    }

    pub fn with_queue_delete_polling(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.queue_delete_poll_interval = interval;
        self.queue_delete_max_attempts = max_attempts;
        self
    }

    /// Every ignored field of `resource_type` for this run
    pub fn ignored_for(&self, resource_type: ResourceType) -> Vec<String> {
        let mut fields = default_ignored_fields(resource_type);
        let configured = self.ignored_attributes.get(&resource_type);
        let cross_org = self
            .cross_org_ignored_attributes
            .get(&resource_type)
            .filter(|_| self.cross_org);
        for field in configured.into_iter().chain(cross_org).flatten() {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        fields
    }

    pub fn derived_for(&self, resource_type: ResourceType) -> Vec<String> {
        self.derived_fields
            .get(&resource_type)
            .cloned()
            .unwrap_or_default()
    }
}
