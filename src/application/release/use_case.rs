//! Release Use Case
//!
//! Drives a release through its phases:
//! 1. Initialize - read every source snapshot
//! 2. Prepare targets - per-target payloads, hook templates, remote objects
//! 3. Override references - rewrite references for the plan (placeholders allowed)
//! 4. Compare - three-way merge against the deploy state (drift, conflicts)
//! 5. Deploy, first pass - create/update group by group, dependencies first
//! 6. Deploy, second pass - patch references that only resolve once ids exist
//! 7. Persist state - deploy state and manifest target ids
//!
//! Per-object failures never stop siblings; a phase with any failure stops
//! the run after saving whatever succeeded.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::domain::entities::{
    collect_target_ids, state_key, DeployState, Manifest, ReleaseObject, Target,
};
use crate::domain::ports::{
    ApiError, ApiResult, AutoDecline, DeployStateRepository, ManifestRepository, Method,
    NoopEventSink, ObjectStore, Prompt, ReleaseEvent, ReleaseEventSink, RemoteApi, StoreError,
};
use crate::domain::services::{
    apply_overrides, project_onto, reverse_target_reference_into_source, three_way_merge, Differ,
    HookGraph, LookupTable, MergeFields, MergeResult, ReferenceContext, ReferenceMode,
    ReferenceReplacer, ReverseLookupTable,
};
use crate::domain::value_objects::{
    extract_id, ObjectFailure, ObjectId, ObjectRef, Phase, ResourceType, UNKNOWN_REFERENCE,
};
use crate::error::{FerryError, FerryResult};

use super::dispatcher::Dispatcher;
use super::options::ReleaseConfig;
use super::result::{
    PhaseReport, PlanAction, PlanEntry, ReleasePlan, ReleaseResult, TargetComparison,
};
use super::strategy::{set_dotted, strategy_for, CompositeLinks, ResourceStrategy};

/// (type, source id, target index)
pub(super) type TargetKey = (ResourceType, ObjectId, usize);

/// Working set of one run
pub(super) struct Run {
    pub objects: Vec<ReleaseObject>,
    pub state: DeployState,
    pub hooks: HookGraph,
    pub comparisons: HashMap<TargetKey, TargetComparison>,
}

/// Release use case - orchestrates plan, apply and revert
///
/// Parameterized by its storage ports; the remote API, prompt and event sink
/// are shared trait objects.
pub struct ReleaseUseCase<OS, SR, MR>
where
    OS: ObjectStore,
    SR: DeployStateRepository,
    MR: ManifestRepository,
{
    pub(super) object_store: OS,
    pub(super) state_repo: SR,
    pub(super) manifest_repo: MR,
    pub(super) api: Dispatcher,
    pub(super) prompt: Arc<dyn Prompt>,
    pub(super) events: Arc<dyn ReleaseEventSink>,
    pub(super) config: ReleaseConfig,
}

impl<OS, SR, MR> ReleaseUseCase<OS, SR, MR>
where
    OS: ObjectStore,
    SR: DeployStateRepository,
    MR: ManifestRepository,
{
    pub fn new(
        object_store: OS,
        state_repo: SR,
        manifest_repo: MR,
        api: Arc<dyn RemoteApi>,
        config: ReleaseConfig,
    ) -> Self {
        Self {
            object_store,
            state_repo,
            manifest_repo,
            api: Dispatcher::new(api, config.concurrency),
            prompt: Arc::new(AutoDecline),
            events: Arc::new(NoopEventSink),
            config,
        }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn Prompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn ReleaseEventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &ReleaseConfig {
        &self.config
    }

    pub fn manifest_repository(&self) -> &MR {
        &self.manifest_repo
    }

    /// Compute what a release would do, without writing anything
    pub async fn plan(&self, manifest: &Manifest) -> FerryResult<ReleasePlan> {
        let run = self.stage(manifest, false).await?;
        Ok(self.build_plan(&run))
    }

    /// Plan, confirm, deploy in two passes and persist state
    pub async fn apply(&self, manifest: &mut Manifest) -> FerryResult<ReleaseResult> {
        let mut run = self.stage(manifest, true).await?;

        let plan = self.build_plan(&run);
        info!(summary = %plan.summary(), "release plan ready");
        if plan.has_changes()
            && !self
                .prompt
                .confirm(&format!("Apply release plan ({})?", plan.summary()))
        {
            return Err(FerryError::Aborted);
        }

        let first = self.first_deploy(&mut run).await;
        if let Err(e) = first.into_result() {
            self.save_intermediary(&mut run, manifest);
            return Err(e);
        }

        let second = self.second_deploy(&mut run).await;
        if let Err(e) = second.into_result() {
            self.save_intermediary(&mut run, manifest);
            return Err(e);
        }

        self.persist(&mut run, manifest)
    }

    /// Load, initialize, prepare, resolve for the plan and compare
    pub(super) async fn stage(&self, manifest: &Manifest, interactive: bool) -> FerryResult<Run> {
        let state = self.state_repo.load()?;
        let mut objects = manifest.to_release_objects()?;

        self.initialize(&mut objects).into_result()?;
        let hooks = hook_graph(&objects);

        self.prepare_targets(&mut objects).await.into_result()?;

        let mut report = PhaseReport::new(Phase::OverrideReferences);
        self.phase_started(Phase::OverrideReferences, &objects);
        report.extend(self.override_references(&mut objects, &hooks, ReferenceMode::Plan, |_| true));
        self.phase_completed(&report);
        report.into_result()?;

        let comparisons = if self.config.compare {
            let (report, comparisons) = self.compare(&mut objects, &state, &hooks, interactive).await;
            report.into_result()?;
            comparisons
        } else {
            HashMap::new()
        };

        Ok(Run {
            objects,
            state,
            hooks,
            comparisons,
        })
    }

    // ------------------------------------------------------------------
    // Events and failures
    // ------------------------------------------------------------------

    pub(super) fn phase_started(&self, phase: Phase, objects: &[ReleaseObject]) {
        let object_count: usize = objects.iter().map(|o| o.walk().len()).sum();
        info!(%phase, object_count, "phase started");
        self.events.on_event(ReleaseEvent::PhaseStarted {
            phase,
            object_count,
        });
    }

    pub(super) fn phase_completed(&self, report: &PhaseReport) {
        if report.is_success() {
            info!(phase = %report.phase, "phase completed");
        } else {
            warn!(phase = %report.phase, failures = report.failures.len(), "phase completed with failures");
        }
        self.events.on_event(ReleaseEvent::PhaseCompleted {
            phase: report.phase,
            failure_count: report.failures.len(),
        });
    }

    /// Log and report one object's failure; flags are set by the caller
    pub(super) fn failure(&self, object: &ObjectRef, error: &FerryError) -> ObjectFailure {
        error!(object = %object, error = %error, "object failed");
        self.events.on_event(ReleaseEvent::ObjectFailed {
            object: object.clone(),
            error: error.to_string(),
        });
        ObjectFailure::new(object.clone(), error.to_string())
    }

    /// Fail `object` when a required child failed
    fn propagate_child_failures(
        &self,
        object: &mut ReleaseObject,
        mark: fn(&mut ReleaseObject),
    ) -> Option<ObjectFailure> {
        if object.failed() {
            return None;
        }
        let failed = object.failed_required_children();
        if failed.is_empty() {
            return None;
        }
        mark(object);
        let error = FerryError::SubObjectFailure {
            object: object.object_ref(),
            failures: failed,
        };
        Some(self.failure(&object.object_ref(), &error))
    }

    // ------------------------------------------------------------------
    // Initialize
    // ------------------------------------------------------------------

    fn initialize(&self, objects: &mut [ReleaseObject]) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::Initialize);
        self.phase_started(Phase::Initialize, objects);
        for object in objects.iter_mut() {
            object.for_each_mut(&mut |node| {
                if let Err(e) = self.initialize_node(node) {
                    node.initialize_failed = true;
                    report.extend([self.failure(&node.object_ref(), &e)]);
                }
            });
            report.extend(self.propagate_child_failures(object, |o| o.initialize_failed = true));
        }
        self.phase_completed(&report);
        report
    }

    pub(super) fn initialize_node(&self, node: &mut ReleaseObject) -> FerryResult<()> {
        let object_ref = node.object_ref();
        let data = self
            .object_store
            .read_object(&object_ref)
            .map_err(|e| match e {
                StoreError::NotFound(path) => FerryError::PathNotFound {
                    object: object_ref.clone(),
                    path,
                },
                other => FerryError::Store(other),
            })?;
        node.initialize(data);
        node.ignored_attributes = self.config.ignored_for(node.resource_type());
        node.derived_fields = self.config.derived_for(node.resource_type());
        debug!(object = %node.object_ref(), "initialized");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Prepare targets
    // ------------------------------------------------------------------

    async fn prepare_targets(&self, objects: &mut [ReleaseObject]) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::PrepareTargets);
        self.phase_started(Phase::PrepareTargets, objects);

        for object in objects.iter_mut() {
            object.for_each_mut(&mut prepare_node);
        }

        // Template lookups may prompt, so they run one at a time
        let mut templates = None;
        for hook in objects
            .iter_mut()
            .filter(|o| o.resource_type() == ResourceType::Hook && !o.failed())
        {
            if let Err(e) = self.resolve_hook_template(hook, &mut templates).await {
                hook.initialize_failed = true;
                report.extend([self.failure(&hook.object_ref(), &e)]);
            }
        }

        report.extend(self.fetch_remote(objects).await);
        self.phase_completed(&report);
        report
    }

    /// Point `hook_template` at the target template of the same name
    async fn resolve_hook_template(
        &self,
        hook: &mut ReleaseObject,
        templates: &mut Option<Vec<Value>>,
    ) -> FerryResult<()> {
        let has_template = hook
            .data()
            .and_then(|d| d.get("hook_template"))
            .is_some_and(|t| !t.is_null());
        if !has_template {
            return Ok(());
        }

        if templates.is_none() {
            let listed = self
                .list_hook_templates()
                .await
                .map_err(|e| FerryError::remote(&hook.object_ref(), e))?;
            *templates = Some(listed);
        }
        let available = templates.as_deref().unwrap_or_default();

        let name = hook.name().to_string();
        let matches: Vec<&Value> = available
            .iter()
            .filter(|t| t.get("name").and_then(Value::as_str) == Some(name.as_str()))
            .collect();

        let chosen = match matches.as_slice() {
            [] => {
                warn!(object = %hook.object_ref(), "no hook template named '{name}' on the target, field dropped");
                None
            }
            [single] => single.get("url").cloned(),
            several => {
                let options: Vec<String> = several
                    .iter()
                    .map(|t| {
                        let url = t.get("url").and_then(Value::as_str).unwrap_or("?");
                        format!("{name} ({url})")
                    })
                    .collect();
                let question = format!("Several hook templates are named '{name}'. Which one should be used?");
                self.prompt
                    .select(&question, &options)
                    .and_then(|i| several.get(i))
                    .and_then(|t| t.get("url").cloned())
            }
        };

        for target in &mut hook.targets {
            if let Some(Value::Object(payload)) = target.pre_reference_replace_data.as_mut() {
                match &chosen {
                    Some(url) => {
                        payload.insert("hook_template".to_string(), url.clone());
                    }
                    None => {
                        payload.remove("hook_template");
                    }
                }
            }
        }
        Ok(())
    }

    async fn list_hook_templates(&self) -> ApiResult<Vec<Value>> {
        let url = format!("{}/hook_templates", self.api.base_url().trim_end_matches('/'));
        let response = self.api.request(Method::Get, &url, None).await?;
        Ok(match response {
            Some(Value::Array(items)) => items,
            Some(Value::Object(mut page)) => match page.remove("results") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        })
    }

    /// Fetch the current remote object of every existing target
    async fn fetch_remote(&self, objects: &mut [ReleaseObject]) -> Vec<ObjectFailure> {
        let mut wanted: Vec<(ResourceType, ObjectId)> = Vec::new();
        for node in objects.iter().flat_map(|o| o.walk()) {
            if node.failed() {
                continue;
            }
            for id in node.targets.iter().filter_map(|t| t.id) {
                let key = (node.resource_type(), id);
                if !wanted.contains(&key) {
                    wanted.push(key);
                }
            }
        }

        let fetched = join_all(wanted.iter().map(|&(ty, id)| async move {
            ((ty, id), self.api.fetch_one(ty, id).await)
        }))
        .await;
        let results: HashMap<(ResourceType, ObjectId), ApiResult<Value>> =
            fetched.into_iter().collect();

        let mut failures = Vec::new();
        for object in objects.iter_mut() {
            object.for_each_mut(&mut |node| {
                let ty = node.resource_type();
                let object_ref = node.object_ref();
                let mut failed = None;
                for target in &mut node.targets {
                    let Some(id) = target.id else {
                        continue;
                    };
                    match results.get(&(ty, id)) {
                        Some(Ok(remote)) => target.remote_data = Some(remote.clone()),
                        Some(Err(e)) => {
                            failed.get_or_insert_with(|| FerryError::remote(&object_ref, e.clone()));
                        }
                        None => {}
                    }
                }
                if let Some(e) = failed {
                    node.initialize_failed = true;
                    failures.push(self.failure(&object_ref, &e));
                }
            });
        }
        failures
    }

    // ------------------------------------------------------------------
    // Override references
    // ------------------------------------------------------------------

    /// Resolve references of every included object for `mode`
    ///
    /// The lookup table is rebuilt from the current target ids on every call.
    pub(super) fn override_references(
        &self,
        objects: &mut [ReleaseObject],
        hooks: &HookGraph,
        mode: ReferenceMode,
        include: impl Fn(&ReleaseObject) -> bool,
    ) -> Vec<ObjectFailure> {
        let lookup = LookupTable::build(objects.iter());
        let reverse = lookup.reverse();
        let ctx = ReferenceContext {
            lookup: &lookup,
            reverse: &reverse,
            base_url: self.api.base_url(),
            mode,
        };

        let mut failures = Vec::new();
        for object in objects.iter_mut().filter(|o| include(o)) {
            object.for_each_mut(&mut |node| {
                if node.failed() {
                    return;
                }
                if let Err(e) = stage_node(node, ctx, hooks) {
                    match mode {
                        ReferenceMode::Plan => node.initialize_failed = true,
                        ReferenceMode::FirstPass | ReferenceMode::Final => node.deploy_failed = true,
                    }
                    failures.push(self.failure(&node.object_ref(), &e));
                }
            });
        }
        failures
    }

    // ------------------------------------------------------------------
    // Compare
    // ------------------------------------------------------------------

    async fn compare(
        &self,
        objects: &mut [ReleaseObject],
        state: &DeployState,
        hooks: &HookGraph,
        interactive: bool,
    ) -> (PhaseReport, HashMap<TargetKey, TargetComparison>) {
        let mut report = PhaseReport::new(Phase::Compare);
        self.phase_started(Phase::Compare, objects);

        let lookup = LookupTable::build(objects.iter());
        let reverse = lookup.reverse();
        let ctx = ReferenceContext {
            lookup: &lookup,
            reverse: &reverse,
            base_url: self.api.base_url(),
            mode: ReferenceMode::Plan,
        };

        let mut comparisons = HashMap::new();
        for object in objects.iter_mut() {
            for path in object.node_paths() {
                let Some(node) = object.node_mut(&path) else {
                    continue;
                };
                if node.failed() {
                    continue;
                }
                match self.compare_node(node, state, ctx, hooks, interactive).await {
                    Ok(found) => {
                        for comparison in found {
                            comparisons.insert(
                                (node.resource_type(), node.id(), comparison.target_index),
                                comparison,
                            );
                        }
                    }
                    Err(e) => {
                        node.initialize_failed = true;
                        report.extend([self.failure(&node.object_ref(), &e)]);
                    }
                }
            }
            report.extend(self.propagate_child_failures(object, |o| o.initialize_failed = true));
        }

        self.phase_completed(&report);
        (report, comparisons)
    }

    async fn compare_node(
        &self,
        node: &mut ReleaseObject,
        state: &DeployState,
        ctx: ReferenceContext<'_>,
        hooks: &HookGraph,
        interactive: bool,
    ) -> FerryResult<Vec<TargetComparison>> {
        self.check_timestamps(node, state, interactive)?;

        let mut comparisons = self.compare_targets(node, state, ctx.reverse);
        self.report_drift(node, &comparisons);
        if !interactive {
            return Ok(comparisons);
        }

        if comparisons.iter().any(|c| !c.rebase_candidates.is_empty()) {
            let paths = joined_paths(comparisons.iter().flat_map(|c| c.rebase_candidates.keys()));
            let question = format!(
                "{}: the target changed since the last deploy ({paths}). Pull these changes into the local snapshot?",
                node.object_ref()
            );
            if self.prompt.confirm(&question) {
                self.accept_rebase(node, &comparisons)?;
                self.restage_node(node, ctx, hooks).await?;
                comparisons = self.compare_targets(node, state, ctx.reverse);
            } else {
                info!(object = %node.object_ref(), "target-side changes will be overwritten");
            }
        }

        if comparisons.iter().any(|c| !c.conflicts.is_empty()) {
            let paths = joined_paths(comparisons.iter().flat_map(|c| c.conflicts.keys()));
            let location = self.object_store.locate(&node.object_ref());
            let question = format!(
                "{}: source and target both changed {paths}. Resolve the conflict in {} and confirm to continue",
                node.object_ref(),
                location.display()
            );
            if !self.prompt.confirm(&question) {
                return Err(FerryError::Conflict {
                    object: node.object_ref(),
                    paths: conflict_paths(&comparisons),
                });
            }
            self.reinitialize(node)?;
            self.restage_node(node, ctx, hooks).await?;
            comparisons = self.compare_targets(node, state, ctx.reverse);
            let remaining = conflict_paths(&comparisons);
            if !remaining.is_empty() {
                return Err(FerryError::Conflict {
                    object: node.object_ref(),
                    paths: remaining,
                });
            }
        }
        Ok(comparisons)
    }

    /// A remote object modified after our last deploy needs an explicit overwrite
    fn check_timestamps(
        &self,
        node: &mut ReleaseObject,
        state: &DeployState,
        interactive: bool,
    ) -> FerryResult<()> {
        let object_ref = node.object_ref();
        let ty = node.resource_type();
        let direction = self.config.direction;
        for target in &mut node.targets {
            let (Some(target_id), Some(remote)) = (target.id, target.remote_data.as_ref()) else {
                continue;
            };
            let (source_id, state_target) = state_key(direction, object_ref.id, target_id);
            let Some(deployed_at) = state
                .entry(ty, source_id, state_target)
                .and_then(|e| e.deployed_at)
            else {
                continue;
            };
            let Some(modified_at) = remote
                .get("modified_at")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc))
            else {
                continue;
            };
            if modified_at <= deployed_at {
                continue;
            }

            let message = format!(
                "target {target_id} was modified at {modified_at} after the last deploy at {deployed_at}"
            );
            if !interactive {
                warn!(object = %object_ref, "{message}");
                target.warnings.push(message);
                continue;
            }
            if !self.prompt.confirm(&format!("{object_ref}: {message}. Overwrite it?")) {
                return Err(FerryError::TimestampMismatch {
                    object: object_ref.clone(),
                    target_id,
                    remote_modified_at: modified_at.to_rfc3339(),
                    deployed_at: deployed_at.to_rfc3339(),
                });
            }
        }
        Ok(())
    }

    fn compare_targets(
        &self,
        node: &ReleaseObject,
        state: &DeployState,
        reverse: &ReverseLookupTable,
    ) -> Vec<TargetComparison> {
        let ty = node.resource_type();
        let strategy = strategy_for(ty);
        let direction = self.config.direction;
        let mut comparisons = Vec::new();
        for target in &node.targets {
            let (Some(target_id), Some(remote), Some(staged)) = (
                target.id,
                target.remote_data.as_ref(),
                target.visualized_plan_data.as_ref(),
            ) else {
                continue;
            };
            let (source_id, state_target) = state_key(direction, node.id(), target_id);
            let Some(last) = state.get_last_applied(ty, source_id, state_target, direction) else {
                debug!(object = %node.object_ref(), target_id, "no last applied state, drift detection skipped");
                continue;
            };

            let remote = project_remote(remote, staged, last);
            let overrides: Vec<String> = target.attribute_override.keys().cloned().collect();
            let result = three_way_merge(
                last,
                staged,
                &remote,
                MergeFields {
                    ignored: &node.ignored_attributes,
                    overrides: &overrides,
                    derived: &node.derived_fields,
                },
            );
            comparisons.push(self.describe(target, target_id, result, strategy, reverse));
        }
        comparisons
    }

    /// Translate a merge result into source vocabulary
    fn describe(
        &self,
        target: &Target,
        target_id: ObjectId,
        result: MergeResult,
        strategy: &dyn ResourceStrategy,
        reverse: &ReverseLookupTable,
    ) -> TargetComparison {
        let mut comparison = TargetComparison {
            target_index: target.index,
            target_id,
            ..TargetComparison::default()
        };

        for (path, value) in result.rebase_candidates {
            let shown = self.in_source_vocabulary(&path, &value, strategy, reverse);
            if contains_unknown_reference(&shown) {
                comparison
                    .warnings
                    .push(format!("'{path}' holds target-only references: {shown}"));
            }
            comparison.rebase_candidates.insert(path, shown);
        }

        for (path, mut conflict) in result.conflicts {
            conflict.source = self.in_source_vocabulary(&path, &conflict.source, strategy, reverse);
            conflict.target = self.in_source_vocabulary(&path, &conflict.target, strategy, reverse);
            if differs_only_by_unknown_references(&conflict.source, &conflict.target) {
                let message = format!(
                    "'{path}' differs only by target-only references: {}",
                    conflict.target
                );
                warn!("{message}");
                comparison.warnings.push(message);
                continue;
            }
            comparison.conflicts.insert(path, conflict);
        }
        comparison
    }

    fn in_source_vocabulary(
        &self,
        path: &str,
        value: &Value,
        strategy: &dyn ResourceStrategy,
        reverse: &ReverseLookupTable,
    ) -> Value {
        let expected = strategy
            .reference_fields()
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.target)
            .or_else(|| {
                (strategy.resource_type() == ResourceType::Hook && path == "run_after")
                    .then_some(ResourceType::Hook)
            });
        match expected {
            Some(ty) => {
                reverse_target_reference_into_source(value, ty, reverse, &self.config.source_base_url)
            }
            None => value.clone(),
        }
    }

    fn report_drift(&self, node: &mut ReleaseObject, comparisons: &[TargetComparison]) {
        for comparison in comparisons.iter().filter(|c| c.has_drift()) {
            for (path, value) in &comparison.rebase_candidates {
                warn!(object = %node.object_ref(), target_id = comparison.target_id, path, %value, "target drifted");
            }
            for (path, conflict) in &comparison.conflicts {
                warn!(
                    object = %node.object_ref(),
                    target_id = comparison.target_id,
                    path,
                    source = %conflict.source,
                    target = %conflict.target,
                    "conflict"
                );
            }
            self.events.on_event(ReleaseEvent::DriftDetected {
                object: node.object_ref(),
                target_id: comparison.target_id,
                rebase_candidates: comparison.rebase_candidates.len(),
                conflicts: comparison.conflicts.len(),
            });
        }
        node.rebase_detected |= comparisons.iter().any(|c| !c.rebase_candidates.is_empty());
        node.conflict_detected |= comparisons.iter().any(|c| !c.conflicts.is_empty());
    }

    /// Write accepted target-side values into the local snapshot and reload it
    fn accept_rebase(
        &self,
        node: &mut ReleaseObject,
        comparisons: &[TargetComparison],
    ) -> FerryResult<()> {
        let Some(mut data) = node.data().cloned() else {
            return Ok(());
        };
        for (path, value) in comparisons.iter().flat_map(|c| &c.rebase_candidates) {
            match without_unknown_references(value) {
                Some(value) => set_dotted(&mut data, path, value),
                None => warn!(object = %node.object_ref(), path, "target-only reference not pulled back"),
            }
        }
        let object_ref = node.object_ref();
        self.object_store.write_object(&object_ref, &data)?;
        info!(object = %object_ref, "target-side changes written to the local snapshot");
        self.reinitialize(node)
    }

    fn reinitialize(&self, node: &mut ReleaseObject) -> FerryResult<()> {
        self.initialize_node(node)
    }

    async fn restage_node(
        &self,
        node: &mut ReleaseObject,
        ctx: ReferenceContext<'_>,
        hooks: &HookGraph,
    ) -> FerryResult<()> {
        prepare_node(node);
        if node.resource_type() == ResourceType::Hook {
            self.resolve_hook_template(node, &mut None).await?;
        }
        stage_node(node, ctx, hooks)
    }

    // ------------------------------------------------------------------
    // Plan
    // ------------------------------------------------------------------

    pub(super) fn build_plan(&self, run: &Run) -> ReleasePlan {
        let differ = Differ::new();
        let mut plan = ReleasePlan::default();
        for node in run.objects.iter().flat_map(|o| o.walk()) {
            for target in &node.targets {
                let Some(payload) = target.visualized_plan_data.clone() else {
                    continue;
                };
                let (action, diff) = match target.id {
                    None => (
                        PlanAction::Create,
                        differ.diff_payloads(None, &payload, ("remote", "staged")),
                    ),
                    Some(_) => {
                        let remote = target.remote_data.as_ref().map(|r| project_onto(r, &payload));
                        let diff = differ.diff_payloads(remote.as_ref(), &payload, ("remote", "staged"));
                        let action = if diff.has_changes() {
                            PlanAction::Update
                        } else {
                            PlanAction::Unchanged
                        };
                        (action, diff)
                    }
                };
                let key = (node.resource_type(), node.id(), target.index);
                plan.entries.push(PlanEntry {
                    object: node.object_ref(),
                    target_index: target.index,
                    target_id: target.id,
                    action,
                    payload,
                    diff,
                    warnings: target.warnings.clone(),
                    comparison: run.comparisons.get(&key).cloned(),
                });
            }
        }
        plan
    }

    // ------------------------------------------------------------------
    // Deploy, first pass
    // ------------------------------------------------------------------

    pub(super) async fn first_deploy(&self, run: &mut Run) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::FirstDeploy);
        self.phase_started(Phase::FirstDeploy, &run.objects);

        for group in deploy_groups(&run.objects) {
            report.extend(self.override_references(
                &mut run.objects,
                &run.hooks,
                ReferenceMode::FirstPass,
                |o| o.resource_type() == group,
            ));

            let deploys = run
                .objects
                .iter_mut()
                .filter(|o| o.resource_type() == group && !o.failed())
                .map(|object| self.deploy_tree(object));
            for failures in join_all(deploys).await {
                report.extend(failures);
            }
        }

        self.phase_completed(&report);
        report
    }

    async fn deploy_tree(&self, object: &mut ReleaseObject) -> Vec<ObjectFailure> {
        let mut failures = Vec::new();
        if object.resource_type() == ResourceType::Queue {
            self.deploy_queue(object, &mut failures).await;
        } else {
            self.deploy_with_children(object, &mut failures).await;
        }
        failures.extend(self.propagate_child_failures(object, |o| o.deploy_failed = true));
        failures
    }

    /// Owner first, then its children wired to the owner's new id
    async fn deploy_with_children(
        &self,
        object: &mut ReleaseObject,
        failures: &mut Vec<ObjectFailure>,
    ) {
        let engine = object.resource_type() == ResourceType::Engine;
        for index in 0..object.target_count() {
            let Some(owner_id) = self
                .deploy_member(object, index, &CompositeLinks::default(), failures)
                .await
            else {
                break;
            };
            let links = CompositeLinks {
                engine: engine.then_some(owner_id),
                ..CompositeLinks::default()
            };
            for child in &mut object.children {
                self.deploy_member(child, index, &links, failures).await;
            }
        }
    }

    /// Schema, queue, then inbox, email templates and rules, per target
    async fn deploy_queue(&self, queue: &mut ReleaseObject, failures: &mut Vec<ObjectFailure>) {
        let schema_index = queue
            .children
            .iter()
            .position(|c| c.resource_type() == ResourceType::Schema);

        for index in 0..queue.target_count() {
            let schema_id = match schema_index {
                Some(i) => {
                    let id = self
                        .deploy_member(&mut queue.children[i], index, &CompositeLinks::default(), failures)
                        .await;
                    if id.is_none() {
                        break;
                    }
                    id
                }
                None => None,
            };

            let links = CompositeLinks {
                schema: schema_id,
                ..CompositeLinks::default()
            };
            let Some(queue_id) = self.deploy_member(queue, index, &links, failures).await else {
                break;
            };

            let links = CompositeLinks {
                queue: Some(queue_id),
                schema: schema_id,
                engine: None,
            };
            for child in queue
                .children
                .iter_mut()
                .filter(|c| c.resource_type() != ResourceType::Schema)
            {
                self.deploy_member(child, index, &links, failures).await;
            }
            if let Some(i) = schema_index {
                for rule in &mut queue.children[i].children {
                    self.deploy_member(rule, index, &links, failures).await;
                }
            }
        }
    }

    /// Deploy one target of one member; `None` when it failed or was skipped
    async fn deploy_member(
        &self,
        member: &mut ReleaseObject,
        index: usize,
        links: &CompositeLinks,
        failures: &mut Vec<ObjectFailure>,
    ) -> Option<ObjectId> {
        if member.failed() {
            return None;
        }
        let ty = member.resource_type();
        let object_ref = member.object_ref();
        let target = member.targets.get_mut(index)?;
        let Some(mut payload) = target.first_deploy_data.clone() else {
            return target.id;
        };
        strategy_for(ty).wire(&mut payload, links, self.api.base_url());
        target.first_deploy_data = Some(payload.clone());

        match self.deploy_target(&object_ref, ty, target, payload).await {
            Ok(id) => Some(id),
            Err(e) => {
                target.deploy_failed = true;
                member.deploy_failed = true;
                failures.push(self.failure(&object_ref, &e));
                None
            }
        }
    }

    async fn deploy_target(
        &self,
        object_ref: &ObjectRef,
        ty: ResourceType,
        target: &mut Target,
        payload: Value,
    ) -> FerryResult<ObjectId> {
        match target.id {
            Some(id) => {
                let unchanged = target
                    .remote_data
                    .as_ref()
                    .is_some_and(|remote| project_onto(remote, &payload) == payload);
                if unchanged {
                    debug!(object = %object_ref, target_id = id, "unchanged, update skipped");
                } else {
                    self.api
                        .update(ty, id, &payload)
                        .await
                        .map_err(|e| FerryError::remote(object_ref, e))?;
                    target.updated = true;
                    info!(object = %object_ref, target_id = id, "updated");
                }
                target.last_applied_data = Some(payload);
                self.events.on_event(ReleaseEvent::ObjectDeployed {
                    object: object_ref.clone(),
                    target_id: id,
                    created: false,
                });
                Ok(id)
            }
            None if ty.is_update_only() => Err(FerryError::InvalidManifest(format!(
                "{object_ref} cannot be created; its target needs an id"
            ))),
            None => {
                let created = self
                    .api
                    .create(ty, &payload)
                    .await
                    .map_err(|e| FerryError::remote(object_ref, e))?;
                let id = created
                    .get("id")
                    .and_then(Value::as_i64)
                    .or_else(|| created.get("url").and_then(extract_id))
                    .ok_or_else(|| {
                        FerryError::remote(
                            object_ref,
                            ApiError::Decode("created object carries no id".to_string()),
                        )
                    })?;
                target.id = Some(id);
                target.created = true;
                target.last_applied_data = Some(payload);
                target.remote_data = Some(created);
                info!(object = %object_ref, target_id = id, "created");
                self.events.on_event(ReleaseEvent::ObjectDeployed {
                    object: object_ref.clone(),
                    target_id: id,
                    created: true,
                });
                Ok(id)
            }
        }
    }

    // ------------------------------------------------------------------
    // Deploy, second pass
    // ------------------------------------------------------------------

    async fn second_deploy(&self, run: &mut Run) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::SecondDeploy);
        self.phase_started(Phase::SecondDeploy, &run.objects);

        report.extend(self.override_references(
            &mut run.objects,
            &run.hooks,
            ReferenceMode::Final,
            |_| true,
        ));

        let mut jobs = Vec::new();
        for node in run.objects.iter().flat_map(|o| o.walk()) {
            if node.failed() {
                continue;
            }
            for target in &node.targets {
                let (Some(target_id), Some(first), Some(second)) = (
                    target.id,
                    target.last_applied_data.as_ref(),
                    target.second_deploy_data.as_ref(),
                ) else {
                    continue;
                };
                if let Some(patch) = changed_fields(first, second) {
                    jobs.push(PatchJob {
                        key: (node.resource_type(), node.id(), target.index),
                        object: node.object_ref(),
                        target_id,
                        patch,
                    });
                }
            }
        }

        let results = join_all(jobs.iter().map(|job| async move {
            let result = self.api.update(job.key.0, job.target_id, &job.patch).await;
            (job, result)
        }))
        .await;

        let mut errors: HashMap<TargetKey, FerryError> = HashMap::new();
        for (job, result) in results {
            match result {
                Ok(_) => info!(object = %job.object, target_id = job.target_id, "second-pass references patched"),
                Err(e) => {
                    errors.insert(job.key, FerryError::remote(&job.object, e));
                }
            }
        }

        for object in run.objects.iter_mut() {
            object.for_each_mut(&mut |node| {
                if node.failed() {
                    return;
                }
                let ty = node.resource_type();
                let id = node.id();
                let mut failed = None;
                for target in &mut node.targets {
                    if let Some(e) = errors.remove(&(ty, id, target.index)) {
                        target.deploy_failed = true;
                        failed.get_or_insert(e);
                        continue;
                    }
                    if target.id.is_some() && target.last_applied_data.is_some() {
                        if let Some(second) = target.second_deploy_data.clone() {
                            target.last_applied_data = Some(second);
                        }
                    }
                }
                if let Some(e) = failed {
                    node.deploy_failed = true;
                    report.extend([self.failure(&node.object_ref(), &e)]);
                }
            });
            report.extend(self.propagate_child_failures(object, |o| o.deploy_failed = true));
        }

        self.phase_completed(&report);
        report
    }

    // ------------------------------------------------------------------
    // Persist
    // ------------------------------------------------------------------

    fn persist(&self, run: &mut Run, manifest: &mut Manifest) -> FerryResult<ReleaseResult> {
        self.phase_started(Phase::PersistState, &run.objects);

        let state_entries = run
            .state
            .update(&run.objects, self.config.direction, Utc::now());
        self.state_repo.save(&run.state)?;
        let manifest_ids_changed = manifest.apply_target_ids(&collect_target_ids(&run.objects));
        self.manifest_repo.save(manifest)?;

        let mut result = ReleaseResult {
            state_entries,
            manifest_ids_changed,
            ..ReleaseResult::default()
        };
        for node in run.objects.iter().flat_map(|o| o.walk()) {
            for target in &node.targets {
                let Some(id) = target.id else {
                    continue;
                };
                if target.created {
                    result.created.push((node.object_ref(), id));
                } else if target.updated {
                    result.updated.push((node.object_ref(), id));
                } else if target.last_applied_data.is_some() {
                    result.unchanged.push((node.object_ref(), id));
                }
            }
        }

        self.phase_completed(&PhaseReport::new(Phase::PersistState));
        info!(
            created = result.created.len(),
            updated = result.updated.len(),
            state_entries,
            "release persisted"
        );
        Ok(result)
    }

    /// Best-effort save of whatever succeeded before a phase failed
    fn save_intermediary(&self, run: &mut Run, manifest: &mut Manifest) {
        let written = run
            .state
            .update(&run.objects, self.config.direction, Utc::now());
        if let Err(e) = self.state_repo.save(&run.state) {
            error!(error = %e, "failed to save intermediary deploy state");
        }
        let changed = manifest.apply_target_ids(&collect_target_ids(&run.objects));
        if let Err(e) = self.manifest_repo.save(manifest) {
            error!(error = %e, "failed to save intermediary manifest");
        }
        info!(state_entries = written, manifest_ids = changed, "intermediary results saved");
    }
}

struct PatchJob {
    key: TargetKey,
    object: ObjectRef,
    target_id: ObjectId,
    patch: Value,
}

/// Per-target payloads stripped of ignored fields
fn prepare_node(node: &mut ReleaseObject) {
    let Some(data) = node.data().cloned() else {
        return;
    };
    let strategy = strategy_for(node.resource_type());
    let ignored = node.ignored_attributes.clone();
    for target in &mut node.targets {
        target.reset_payloads();
        target.pre_reference_replace_data = Some(strategy.prepare_target_payload(&data, &ignored));
    }
}

/// Rewrite references and apply overrides for every target of `node`
fn stage_node(
    node: &mut ReleaseObject,
    ctx: ReferenceContext<'_>,
    hooks: &HookGraph,
) -> FerryResult<()> {
    let strategy = strategy_for(node.resource_type());
    let object_ref = node.object_ref();
    let count = node.target_count();
    for target in &mut node.targets {
        if ctx.mode == ReferenceMode::Final && target.last_applied_data.is_none() {
            continue;
        }
        let Some(mut payload) = target.pre_reference_replace_data.clone() else {
            continue;
        };
        let mut replacer = ReferenceReplacer::new(ctx, object_ref.clone(), target.index, count);
        strategy.override_references(&mut replacer, &mut payload, target.remote_data.as_ref(), hooks)?;
        apply_overrides(&mut payload, &target.attribute_override)?;
        target.warnings = replacer
            .into_warnings()
            .iter()
            .map(ToString::to_string)
            .collect();
        match ctx.mode {
            ReferenceMode::Plan => target.visualized_plan_data = Some(payload),
            ReferenceMode::FirstPass => target.first_deploy_data = Some(payload),
            ReferenceMode::Final => target.second_deploy_data = Some(payload),
        }
    }
    Ok(())
}

fn hook_graph(objects: &[ReleaseObject]) -> HookGraph {
    let mut graph = HookGraph::new();
    for hook in objects
        .iter()
        .filter(|o| o.resource_type() == ResourceType::Hook)
    {
        if let Some(data) = hook.data() {
            graph.insert(hook.id(), data);
        }
    }
    graph
}

/// Top-level types present, in deploy order
fn deploy_groups(objects: &[ReleaseObject]) -> Vec<ResourceType> {
    let mut groups: Vec<ResourceType> = Vec::new();
    for object in objects {
        if !groups.contains(&object.resource_type()) {
            groups.push(object.resource_type());
        }
    }
    groups.sort_by_key(|ty| ty.deploy_rank());
    groups
}

/// Keys of `second` whose value differs from `first`
fn changed_fields(first: &Value, second: &Value) -> Option<Value> {
    let (Value::Object(first), Value::Object(second)) = (first, second) else {
        return (first != second).then(|| second.clone());
    };
    let patch: Map<String, Value> = second
        .iter()
        .filter(|(k, v)| first.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    (!patch.is_empty()).then_some(Value::Object(patch))
}

/// Remote keys that the staged payload or the last applied state know about
fn project_remote(remote: &Value, staged: &Value, last: &Value) -> Value {
    let (Value::Object(remote), Some(staged), Some(last)) =
        (remote, staged.as_object(), last.as_object())
    else {
        return remote.clone();
    };
    let projected: Map<String, Value> = remote
        .iter()
        .filter(|(k, _)| staged.contains_key(*k) || last.contains_key(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Value::Object(projected)
}

fn is_unknown_reference(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| s.starts_with(UNKNOWN_REFERENCE))
}

fn contains_unknown_reference(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(is_unknown_reference),
        other => is_unknown_reference(other),
    }
}

fn without_unknown_references(value: &Value) -> Option<Value> {
    match value {
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter(|v| !is_unknown_reference(v))
                .cloned()
                .collect(),
        )),
        other if is_unknown_reference(other) => None,
        other => Some(other.clone()),
    }
}

fn differs_only_by_unknown_references(source: &Value, target: &Value) -> bool {
    if !contains_unknown_reference(source) && !contains_unknown_reference(target) {
        return false;
    }
    without_unknown_references(source) == without_unknown_references(target)
}

fn conflict_paths(comparisons: &[TargetComparison]) -> Vec<String> {
    let mut paths: Vec<String> = comparisons
        .iter()
        .flat_map(|c| c.conflicts.keys().cloned())
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

fn joined_paths<'a>(paths: impl Iterator<Item = &'a String>) -> String {
    let mut paths: Vec<&str> = paths.map(String::as_str).collect();
    paths.sort_unstable();
    paths.dedup();
    paths.join(", ")
}

#[cfg(test)]
mod helper_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn changed_fields_lists_only_differences() {
        let first = json!({"name": "a", "run_after": []});
        let second = json!({"name": "a", "run_after": ["https://t/v1/hooks/9"]});
        assert_eq!(
            changed_fields(&first, &second),
            Some(json!({"run_after": ["https://t/v1/hooks/9"]}))
        );
        assert_eq!(changed_fields(&first, &first), None);
    }

    #[test]
    fn remote_projection_drops_server_only_keys() {
        let remote = json!({"name": "a", "counts": {"x": 1}, "settings": {}});
        let projected = project_remote(&remote, &json!({"name": "b"}), &json!({"settings": {}}));
        assert_eq!(projected, json!({"name": "a", "settings": {}}));
    }

    #[test]
    fn unknown_references_alone_are_not_a_conflict() {
        let source = json!(["https://s/v1/queues/1"]);
        let target = json!(["https://s/v1/queues/1", "UNKNOWN_REFERENCE(https://t/v1/queues/9)"]);
        assert!(differs_only_by_unknown_references(&source, &target));
        assert!(!differs_only_by_unknown_references(&json!(1), &json!(2)));
    }

    #[test]
    fn deploy_groups_follow_dependency_order() {
        let objects = vec![
            ReleaseObject::new(ResourceType::Hook, 1, "h"),
            ReleaseObject::new(ResourceType::Queue, 2, "q"),
            ReleaseObject::new(ResourceType::Workspace, 3, "w"),
            ReleaseObject::new(ResourceType::Queue, 4, "q2"),
        ];
        assert_eq!(
            deploy_groups(&objects),
            vec![ResourceType::Workspace, ResourceType::Queue, ResourceType::Hook]
        );
    }
}
