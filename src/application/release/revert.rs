//! Revert
//!
//! Deletes every deployed target of a manifest, dependents before their
//! dependencies, and forgets them in the deploy state and the manifest.

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::domain::entities::{collect_target_ids, state_key, Manifest, ReleaseObject};
use crate::domain::ports::{
    ApiError, ApiResult, DeployStateRepository, ManifestRepository, ObjectStore, ReleaseEvent,
};
use crate::domain::value_objects::{ObjectFailure, ObjectId, ObjectRef, Phase, ResourceType};
use crate::error::{FerryError, FerryResult};

use super::result::{PhaseReport, RevertResult};
use super::strategy::{strategy_for, Deletion};
use super::use_case::ReleaseUseCase;

/// Deletion order; the organization is never deleted
pub const REVERT_ORDER: [ResourceType; 11] = [
    ResourceType::Hook,
    ResourceType::Rule,
    ResourceType::EmailTemplate,
    ResourceType::Inbox,
    ResourceType::Queue,
    ResourceType::Schema,
    ResourceType::Label,
    ResourceType::RuleTemplate,
    ResourceType::EngineField,
    ResourceType::Engine,
    ResourceType::Workspace,
];

impl<OS, SR, MR> ReleaseUseCase<OS, SR, MR>
where
    OS: ObjectStore,
    SR: DeployStateRepository,
    MR: ManifestRepository,
{
    /// Delete every deployed target of `manifest`
    ///
    /// A target that is already gone counts as deleted.
    pub async fn revert(&self, manifest: &mut Manifest) -> FerryResult<RevertResult> {
        let mut state = self.state_repo.load()?;
        let mut objects: Vec<ReleaseObject> = manifest
            .to_release_objects()?
            .into_iter()
            .flat_map(ReleaseObject::into_flat)
            .collect();

        let deployed = objects
            .iter()
            .filter(|o| o.resource_type() != ResourceType::Organization)
            .flat_map(|o| o.targets.iter())
            .filter(|t| t.id.is_some())
            .count();
        if deployed == 0 {
            info!("nothing to revert");
            return Ok(RevertResult::default());
        }
        if !self
            .prompt
            .confirm(&format!("Delete {deployed} target object(s)?"))
        {
            return Err(FerryError::Aborted);
        }

        let mut report = PhaseReport::new(Phase::Revert);
        self.phase_started(Phase::Revert, &objects);

        let mut result = RevertResult::default();
        for resource_type in REVERT_ORDER {
            let deletions = objects
                .iter_mut()
                .filter(|o| o.resource_type() == resource_type)
                .map(|object| self.revert_object(object));
            for (deleted, failure) in join_all(deletions).await {
                result.deleted.extend(deleted);
                report.extend(failure);
            }
        }

        for (object, target_id) in &result.deleted {
            let (source_id, target_id) = state_key(self.config.direction, object.id, *target_id);
            if state.purge_target(object.resource_type, source_id, target_id) {
                result.purged += 1;
            }
        }
        self.state_repo.save(&state)?;
        manifest.apply_target_ids(&collect_target_ids(&objects));
        self.manifest_repo.save(manifest)?;

        self.phase_completed(&report);
        report.into_result()?;
        info!(deleted = result.deleted.len(), purged = result.purged, "revert finished");
        Ok(result)
    }

    /// Forget every deployment of one source object, without touching the remote
    pub fn purge(&self, resource_type: ResourceType, source_id: ObjectId) -> FerryResult<bool> {
        let mut state = self.state_repo.load()?;
        if !state.purge(resource_type, source_id) {
            debug!(resource = %resource_type, source_id, "nothing to purge");
            return Ok(false);
        }
        self.state_repo.save(&state)?;
        info!(resource = %resource_type, source_id, "purged from deploy state");
        Ok(true)
    }

    async fn revert_object(
        &self,
        object: &mut ReleaseObject,
    ) -> (Vec<(ObjectRef, ObjectId)>, Option<ObjectFailure>) {
        let object_ref = object.object_ref();
        let resource_type = object.resource_type();
        let mut deleted = Vec::new();
        let mut failure = None;

        for target in &mut object.targets {
            let Some(target_id) = target.id else {
                continue;
            };
            match self.delete_target(resource_type, target_id).await {
                Ok(()) => {
                    target.id = None;
                    info!(object = %object_ref, target_id, "deleted");
                    self.events.on_event(ReleaseEvent::ObjectDeleted {
                        object: object_ref.clone(),
                        target_id,
                    });
                    deleted.push((object_ref.clone(), target_id));
                }
                Err(e) => {
                    failure = Some(self.failure(&object_ref, &FerryError::remote(&object_ref, e)));
                    break;
                }
            }
        }

        if failure.is_some() {
            object.revert_failed = true;
        }
        (deleted, failure)
    }

    async fn delete_target(&self, resource_type: ResourceType, id: ObjectId) -> ApiResult<()> {
        match self.api.delete(resource_type, id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(resource = %resource_type, id, "already deleted");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        if strategy_for(resource_type).deletion() == Deletion::Polled {
            self.wait_until_gone(resource_type, id).await?;
        }
        Ok(())
    }

    /// Deletion of some resources completes asynchronously on the remote side
    async fn wait_until_gone(&self, resource_type: ResourceType, id: ObjectId) -> ApiResult<()> {
        let attempts = self.config.queue_delete_max_attempts;
        for attempt in 1..=attempts {
            match self.api.fetch_one(resource_type, id).await {
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
                Ok(_) => {
                    debug!(resource = %resource_type, id, attempt, "still deleting");
                    tokio::time::sleep(self.config.queue_delete_poll_interval).await;
                }
            }
        }
        warn!(resource = %resource_type, id, attempts, "deletion did not complete");
        Err(ApiError::Transport(format!(
            "{resource_type} {id} still exists after {attempts} checks"
        )))
    }
}
