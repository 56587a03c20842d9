//! Reverse manifest
//!
//! Builds the manifest of the opposite release: every deployed target becomes
//! a source entry whose single target is the original source object. Override
//! values are reconstructed from the last applied payload so that releasing
//! back reproduces the original source values.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::domain::entities::{
    state_key, DeployState, EngineEntry, Manifest, ManifestEntry, ManifestTarget, QueueEntry,
};
use crate::domain::ports::{DeployStateRepository, ManifestRepository, ObjectStore};
use crate::domain::services::reverse_attribute_override;
use crate::domain::value_objects::{Direction, ObjectId, Phase, ResourceType};
use crate::error::FerryResult;

use super::result::PhaseReport;
use super::use_case::ReleaseUseCase;

impl<OS, SR, MR> ReleaseUseCase<OS, SR, MR>
where
    OS: ObjectStore,
    SR: DeployStateRepository,
    MR: ManifestRepository,
{
    /// Manifest that releases every deployed target back onto its source
    pub fn reverse_manifest(&self, manifest: &Manifest) -> FerryResult<Manifest> {
        let state = self.state_repo.load()?;
        let mut objects = manifest.to_release_objects()?;

        let mut report = PhaseReport::new(Phase::Initialize);
        for object in objects.iter_mut() {
            object.for_each_mut(&mut |node| {
                if let Err(e) = self.initialize_node(node) {
                    node.initialize_failed = true;
                    report.extend([self.failure(&node.object_ref(), &e)]);
                }
            });
        }
        report.into_result()?;

        let sources = objects
            .iter()
            .flat_map(|o| o.walk())
            .filter_map(|node| Some(((node.resource_type(), node.id()), node.data()?.clone())))
            .collect();
        let reverser = Reverser {
            sources,
            state: &state,
            direction: self.config.direction,
        };
        reverser.manifest(manifest)
    }
}

struct Reverser<'a> {
    sources: HashMap<(ResourceType, ObjectId), Value>,
    state: &'a DeployState,
    direction: Direction,
}

impl Reverser<'_> {
    fn manifest(&self, manifest: &Manifest) -> FerryResult<Manifest> {
        let mut reversed = Manifest::default();

        if let Some(org) = &manifest.organization {
            if org.targets.len() > 1 {
                warn!(id = org.id, "organization has several targets, only the first is reversed");
            }
            reversed.organization = self.entry(ResourceType::Organization, org, 0)?;
        }

        reversed.workspaces = self.flat(ResourceType::Workspace, &manifest.workspaces)?;
        reversed.labels = self.flat(ResourceType::Label, &manifest.labels)?;
        reversed.rule_templates = self.flat(ResourceType::RuleTemplate, &manifest.rule_templates)?;
        reversed.hooks = self.flat(ResourceType::Hook, &manifest.hooks)?;

        for engine in &manifest.engines {
            for index in 0..engine.entry.targets.len() {
                let Some(entry) = self.entry(ResourceType::Engine, &engine.entry, index)? else {
                    continue;
                };
                let mut fields = Vec::new();
                for field in &engine.fields {
                    fields.extend(self.entry(ResourceType::EngineField, field, index)?);
                }
                reversed.engines.push(EngineEntry { entry, fields });
            }
        }

        for queue in &manifest.queues {
            for index in 0..queue.entry.targets.len() {
                let Some(entry) = self.entry(ResourceType::Queue, &queue.entry, index)? else {
                    continue;
                };
                let Some(schema) = self.entry(ResourceType::Schema, &queue.schema, index)? else {
                    warn!(queue = queue.entry.id, index, "deployed queue has no deployed schema, skipped");
                    continue;
                };
                let inbox = match &queue.inbox {
                    Some(inbox) => self.entry(ResourceType::Inbox, inbox, index)?,
                    None => None,
                };
                let mut email_templates = Vec::new();
                for template in &queue.email_templates {
                    email_templates.extend(self.entry(ResourceType::EmailTemplate, template, index)?);
                }
                let mut rules = Vec::new();
                for rule in &queue.rules {
                    rules.extend(self.entry(ResourceType::Rule, rule, index)?);
                }
                reversed.queues.push(QueueEntry {
                    entry,
                    schema,
                    inbox,
                    email_templates,
                    rules,
                });
            }
        }

        Ok(reversed)
    }

    fn flat(&self, resource_type: ResourceType, entries: &[ManifestEntry]) -> FerryResult<Vec<ManifestEntry>> {
        let mut out = Vec::new();
        for entry in entries {
            for index in 0..entry.targets.len() {
                out.extend(self.entry(resource_type, entry, index)?);
            }
        }
        Ok(out)
    }

    /// The reversed entry of target `index`; `None` when it was never deployed
    fn entry(
        &self,
        resource_type: ResourceType,
        entry: &ManifestEntry,
        index: usize,
    ) -> FerryResult<Option<ManifestEntry>> {
        let Some(target) = entry.targets.get(index) else {
            return Ok(None);
        };
        let Some(target_id) = target.id else {
            debug!(resource = %resource_type, id = entry.id, index, "target not deployed, skipped");
            return Ok(None);
        };

        let paths: Vec<String> = target.attribute_override.keys().cloned().collect();
        let (source_id, state_target) = state_key(self.direction, entry.id, target_id);
        let deployed = self
            .state
            .get_last_applied(resource_type, source_id, state_target, self.direction);
        let attribute_override = match (deployed, self.sources.get(&(resource_type, entry.id))) {
            (Some(deployed), Some(source)) if !paths.is_empty() => {
                reverse_attribute_override(deployed, source, &paths)?
            }
            (None, _) if !paths.is_empty() => {
                warn!(
                    resource = %resource_type,
                    id = entry.id,
                    target_id,
                    "no deploy state, overrides not reconstructed"
                );
                Map::new()
            }
            _ => Map::new(),
        };

        Ok(Some(ManifestEntry::new(
            target_id,
            entry.name.clone(),
            vec![ManifestTarget {
                id: Some(entry.id),
                attribute_override,
            }],
        )))
    }
}
