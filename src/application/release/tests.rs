//! Release Use Case Tests

use super::*;
use crate::domain::entities::{
    DeployState, Manifest, ManifestEntry, ManifestTarget, QueueEntry,
};
use crate::domain::ports::{
    ApiError, ApiResult, AutoApprove, DeployStateRepository, ManifestRepository, ManifestResult,
    Method, ObjectStore, ReleaseEvent, ReleaseEventSink, RemoteApi, StateResult, StoreError,
    StoreResult,
};
use crate::domain::value_objects::{reference_url, Direction, ObjectId, ObjectRef, Phase, ResourceType};
use crate::error::FerryError;
use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TARGET: &str = "https://t/v1";

// Mock implementations for testing

#[derive(Default)]
struct MemoryStore {
    objects: Mutex<HashMap<(ResourceType, ObjectId), Value>>,
    writes: Mutex<Vec<(ResourceType, ObjectId, Value)>>,
}

impl MemoryStore {
    fn with(self, resource_type: ResourceType, data: Value) -> Self {
        let id = data["id"].as_i64().unwrap();
        self.objects
            .lock()
            .unwrap()
            .insert((resource_type, id), data);
        self
    }
}

impl ObjectStore for MemoryStore {
    fn locate(&self, object: &ObjectRef) -> PathBuf {
        PathBuf::from(format!("{}/{}.json", object.resource_type.plural(), object.id))
    }

    fn read_object(&self, object: &ObjectRef) -> StoreResult<Value> {
        self.objects
            .lock()
            .unwrap()
            .get(&(object.resource_type, object.id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(self.locate(object)))
    }

    fn write_object(&self, object: &ObjectRef, data: &Value) -> StoreResult<()> {
        self.writes
            .lock()
            .unwrap()
            .push((object.resource_type, object.id, data.clone()));
        self.objects
            .lock()
            .unwrap()
            .insert((object.resource_type, object.id), data.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
struct MemoryStateRepository {
    state: Arc<Mutex<DeployState>>,
}

impl DeployStateRepository for MemoryStateRepository {
    fn load(&self) -> StateResult<DeployState> {
        Ok(self.state.lock().unwrap().clone())
    }

    fn save(&self, state: &DeployState) -> StateResult<()> {
        *self.state.lock().unwrap() = state.clone();
        Ok(())
    }
}

#[derive(Clone, Default)]
struct MemoryManifestRepository {
    saved: Arc<Mutex<Option<Manifest>>>,
}

impl ManifestRepository for MemoryManifestRepository {
    fn load(&self) -> ManifestResult<Manifest> {
        Ok(self.saved.lock().unwrap().clone().unwrap_or_default())
    }

    fn save(&self, manifest: &Manifest) -> ManifestResult<()> {
        *self.saved.lock().unwrap() = Some(manifest.clone());
        Ok(())
    }
}

/// In-memory remote environment
struct FakeApi {
    objects: Mutex<HashMap<(ResourceType, ObjectId), Value>>,
    next_id: AtomicI64,
    failing_names: HashSet<String>,
    hook_templates: Value,
    calls: Mutex<Vec<String>>,
    /// Deleted objects that stay visible for this many more fetches
    lingering: Mutex<HashMap<(ResourceType, ObjectId), usize>>,
}

impl FakeApi {
    fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1000),
            failing_names: HashSet::new(),
            hook_templates: json!([]),
            calls: Mutex::new(Vec::new()),
            lingering: Mutex::new(HashMap::new()),
        }
    }

    fn with(self, resource_type: ResourceType, id: ObjectId, mut data: Value) -> Self {
        data["id"] = json!(id);
        data["url"] = json!(reference_url(TARGET, resource_type, id));
        self.objects.lock().unwrap().insert((resource_type, id), data);
        self
    }

    fn failing(mut self, name: &str) -> Self {
        self.failing_names.insert(name.to_string());
        self
    }

    fn lingers_after_delete(self, resource_type: ResourceType, id: ObjectId, fetches: usize) -> Self {
        self.lingering.lock().unwrap().insert((resource_type, id), fetches);
        self
    }

    fn get(&self, resource_type: ResourceType, id: ObjectId) -> Option<Value> {
        self.objects.lock().unwrap().get(&(resource_type, id)).cloned()
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RemoteApi for FakeApi {
    fn base_url(&self) -> &str {
        TARGET
    }

    async fn fetch_one(&self, resource_type: ResourceType, id: ObjectId) -> ApiResult<Value> {
        self.log(format!("GET {} {id}", resource_type.plural()));
        if let Some(object) = self.get(resource_type, id) {
            return Ok(object);
        }
        let mut lingering = self.lingering.lock().unwrap();
        match lingering.get_mut(&(resource_type, id)) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Ok(json!({"id": id}))
            }
            _ => Err(ApiError::status(404, "Not found.")),
        }
    }

    async fn create(&self, resource_type: ResourceType, payload: &Value) -> ApiResult<Value> {
        let name = payload["name"].as_str().unwrap_or_default().to_string();
        self.log(format!("POST {} {name}", resource_type.plural()));
        if self.failing_names.contains(&name) {
            return Err(ApiError::status(400, format!("{name} rejected")));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut created = payload.clone();
        created["id"] = json!(id);
        created["url"] = json!(reference_url(TARGET, resource_type, id));
        self.objects
            .lock()
            .unwrap()
            .insert((resource_type, id), created.clone());
        Ok(created)
    }

    async fn update(&self, resource_type: ResourceType, id: ObjectId, payload: &Value) -> ApiResult<Value> {
        self.log(format!("PATCH {} {id}", resource_type.plural()));
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&(resource_type, id))
            .ok_or_else(|| ApiError::status(404, "Not found."))?;
        for (key, value) in payload.as_object().cloned().unwrap_or_default() {
            stored[key.as_str()] = value;
        }
        Ok(stored.clone())
    }

    async fn delete(&self, resource_type: ResourceType, id: ObjectId) -> ApiResult<()> {
        self.log(format!("DELETE {} {id}", resource_type.plural()));
        self.objects
            .lock()
            .unwrap()
            .remove(&(resource_type, id))
            .map(|_| ())
            .ok_or_else(|| ApiError::status(404, "Not found."))
    }

    async fn list_all(&self, resource_type: ResourceType, _filters: &[(String, String)]) -> ApiResult<Vec<Value>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((ty, _), _)| *ty == resource_type)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn request(&self, method: Method, url: &str, _body: Option<&Value>) -> ApiResult<Option<Value>> {
        self.log(format!("{method} {url}"));
        if url.ends_with("/hook_templates") {
            return Ok(Some(self.hook_templates.clone()));
        }
        Err(ApiError::status(404, "Not found."))
    }
}

#[derive(Default)]
struct RecordingEventSink {
    events: Mutex<Vec<ReleaseEvent>>,
}

impl ReleaseEventSink for RecordingEventSink {
    fn on_event(&self, event: ReleaseEvent) {
        self.events.lock().unwrap().push(event);
    }
}

type TestUseCase = ReleaseUseCase<MemoryStore, MemoryStateRepository, MemoryManifestRepository>;

struct Harness {
    use_case: TestUseCase,
    api: Arc<FakeApi>,
    state: MemoryStateRepository,
    manifests: MemoryManifestRepository,
    events: Arc<RecordingEventSink>,
}

fn harness(store: MemoryStore, api: FakeApi, state: DeployState) -> Harness {
    let api = Arc::new(api);
    let state_repo = MemoryStateRepository {
        state: Arc::new(Mutex::new(state)),
    };
    let manifests = MemoryManifestRepository::default();
    let events = Arc::new(RecordingEventSink::default());
    let config = ReleaseConfig::new()
        .with_concurrency(4)
        .with_source_base_url("https://s/v1")
        .with_queue_delete_polling(Duration::from_millis(1), 3);
    let use_case = ReleaseUseCase::new(store, state_repo.clone(), manifests.clone(), api.clone(), config)
        .with_prompt(Arc::new(AutoApprove))
        .with_events(events.clone());
    Harness {
        use_case,
        api,
        state: state_repo,
        manifests,
        events,
    }
}

fn target(id: Option<ObjectId>) -> ManifestTarget {
    ManifestTarget::new(id)
}

fn workspace_store() -> MemoryStore {
    MemoryStore::default()
        .with(ResourceType::Workspace, json!({"id": 1, "url": "https://s/v1/workspaces/1", "name": "Main"}))
        .with(
            ResourceType::Queue,
            json!({
                "id": 10,
                "url": "https://s/v1/queues/10",
                "name": "Invoices",
                "workspace": "https://s/v1/workspaces/1",
                "schema": "https://s/v1/schemas/20",
                "hooks": []
            }),
        )
        .with(ResourceType::Schema, json!({"id": 20, "name": "Invoice schema", "content": []}))
}

fn queue_manifest(queue_targets: Vec<ManifestTarget>, schema_targets: Vec<ManifestTarget>) -> Manifest {
    Manifest {
        workspaces: vec![ManifestEntry::new(1, "Main", vec![target(Some(500))])],
        queues: vec![QueueEntry {
            entry: ManifestEntry::new(10, "Invoices", queue_targets),
            schema: ManifestEntry::new(20, "Invoice schema", schema_targets),
            ..QueueEntry::default()
        }],
        ..Manifest::default()
    }
}

fn hook(id: ObjectId, name: &str, run_after: Vec<ObjectId>) -> Value {
    let run_after: Vec<String> = run_after
        .into_iter()
        .map(|p| format!("https://s/v1/hooks/{p}"))
        .collect();
    json!({"id": id, "name": name, "active": true, "queues": [], "run_after": run_after})
}

#[tokio::test]
async fn plan_renders_placeholders_for_objects_not_created_yet() {
    let api = FakeApi::new().with(ResourceType::Workspace, 500, json!({"name": "Main"}));
    let h = harness(workspace_store(), api, DeployState::new());
    let manifest = queue_manifest(vec![target(None), target(None)], vec![target(None), target(None)]);

    let plan = h.use_case.plan(&manifest).await.unwrap();

    assert_eq!(plan.count(PlanAction::Create), 4);
    assert_eq!(plan.count(PlanAction::Unchanged), 1);
    let queue_payloads: Vec<&Value> = plan
        .entries
        .iter()
        .filter(|e| e.object.resource_type == ResourceType::Queue)
        .map(|e| &e.payload)
        .collect();
    assert_eq!(queue_payloads[0]["schema"], json!("https://t/v1/schemas/200100000000"));
    assert_eq!(queue_payloads[1]["schema"], json!("https://t/v1/schemas/201100000000"));
    assert_eq!(queue_payloads[0]["workspace"], json!("https://t/v1/workspaces/500"));
    assert!(queue_payloads[0].get("id").is_none());

    // Nothing was written
    assert!(h.api.calls().iter().all(|c| !c.starts_with("POST") && !c.starts_with("PATCH")));
    assert!(h.manifests.saved.lock().unwrap().is_none());
}

#[tokio::test]
async fn shared_dependency_is_reported_as_a_warning() {
    let api = FakeApi::new().with(ResourceType::Workspace, 500, json!({"name": "Main"}));
    let h = harness(workspace_store(), api, DeployState::new());
    let manifest = queue_manifest(vec![target(None), target(None)], vec![target(None), target(None)]);

    let plan = h.use_case.plan(&manifest).await.unwrap();

    let queue = plan
        .entries
        .iter()
        .find(|e| e.object.resource_type == ResourceType::Queue)
        .unwrap();
    assert!(queue.warnings.iter().any(|w| w.contains("'workspace'")));
}

#[tokio::test]
async fn apply_creates_composites_and_writes_ids_back() {
    let api = FakeApi::new().with(ResourceType::Workspace, 500, json!({"name": "Main"}));
    let h = harness(workspace_store(), api, DeployState::new());
    let mut manifest = queue_manifest(vec![target(None), target(None)], vec![target(None), target(None)]);

    let result = h.use_case.apply(&mut manifest).await.unwrap();

    assert_eq!(result.created.len(), 4);
    assert_eq!(result.state_entries, 5);
    assert_eq!(result.manifest_ids_changed, 4);

    let queue_ids: Vec<ObjectId> = manifest.queues[0].entry.targets.iter().map(|t| t.id.unwrap()).collect();
    let schema_ids: Vec<ObjectId> = manifest.queues[0].schema.targets.iter().map(|t| t.id.unwrap()).collect();
    for (queue_id, schema_id) in queue_ids.iter().zip(&schema_ids) {
        let queue = h.api.get(ResourceType::Queue, *queue_id).unwrap();
        assert_eq!(queue["schema"], json!(reference_url(TARGET, ResourceType::Schema, schema_id)));
        assert_eq!(queue["workspace"], json!("https://t/v1/workspaces/500"));
    }

    assert_eq!(h.manifests.saved.lock().unwrap().as_ref(), Some(&manifest));
    let state = h.state.state.lock().unwrap();
    assert_eq!(state.len(), 5);
    assert!(state
        .get_last_applied(ResourceType::Queue, 10, queue_ids[0], Direction::Forward)
        .is_some());
}

#[tokio::test]
async fn second_pass_links_hooks_created_in_the_same_run() {
    let store = MemoryStore::default()
        .with(ResourceType::Hook, hook(1, "Extract", vec![]))
        .with(ResourceType::Hook, hook(2, "Validate", vec![1]));
    let h = harness(store, FakeApi::new(), DeployState::new());
    let mut manifest = Manifest {
        hooks: vec![
            ManifestEntry::new(1, "Extract", vec![target(None)]),
            ManifestEntry::new(2, "Validate", vec![target(None)]),
        ],
        ..Manifest::default()
    };

    h.use_case.apply(&mut manifest).await.unwrap();

    let first = manifest.hooks[0].targets[0].id.unwrap();
    let second = manifest.hooks[1].targets[0].id.unwrap();
    let stored = h.api.get(ResourceType::Hook, second).unwrap();
    assert_eq!(stored["run_after"], json!([reference_url(TARGET, ResourceType::Hook, first)]));
    assert!(h.api.calls().contains(&format!("PATCH hooks {second}")));

    // The state records the payload as patched in the second pass
    let state = h.state.state.lock().unwrap();
    let last = state
        .get_last_applied(ResourceType::Hook, 2, second, Direction::Forward)
        .unwrap();
    assert_eq!(last["run_after"], stored["run_after"]);
}

/// Three queues, each owning a schema and an inbox
fn composite_queues_store() -> MemoryStore {
    let mut store = MemoryStore::default();
    for (offset, name) in ["Invoices", "Broken", "Receipts"].into_iter().enumerate() {
        let offset = offset as ObjectId;
        let (queue, schema, inbox) = (10 + offset, 20 + offset, 30 + offset);
        store = store
            .with(
                ResourceType::Queue,
                json!({
                    "id": queue,
                    "name": name,
                    "schema": format!("https://s/v1/schemas/{schema}"),
                    "inbox": format!("https://s/v1/inboxes/{inbox}"),
                    "hooks": []
                }),
            )
            .with(ResourceType::Schema, json!({"id": schema, "name": format!("{name} schema"), "content": []}))
            .with(
                ResourceType::Inbox,
                json!({
                    "id": inbox,
                    "name": format!("{name} inbox"),
                    "email": "intake@s.test",
                    "queues": [format!("https://s/v1/queues/{queue}")]
                }),
            );
    }
    store
}

fn composite_queues_manifest() -> Manifest {
    let queues = ["Invoices", "Broken", "Receipts"]
        .into_iter()
        .enumerate()
        .map(|(offset, name)| {
            let offset = offset as ObjectId;
            QueueEntry {
                entry: ManifestEntry::new(10 + offset, name, vec![target(None)]),
                schema: ManifestEntry::new(20 + offset, format!("{name} schema"), vec![target(None)]),
                inbox: Some(ManifestEntry::new(30 + offset, format!("{name} inbox"), vec![target(None)])),
                ..QueueEntry::default()
            }
        })
        .collect();
    Manifest {
        queues,
        ..Manifest::default()
    }
}

#[tokio::test]
async fn failed_queue_leaves_sibling_queues_deployed() {
    let h = harness(composite_queues_store(), FakeApi::new().failing("Broken"), DeployState::new());
    let mut run = h.use_case.stage(&composite_queues_manifest(), true).await.unwrap();

    let report = h.use_case.first_deploy(&mut run).await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].object.name, "Broken");
    for queue in &run.objects {
        let broken = queue.name() == "Broken";
        assert_eq!(queue.deploy_failed, broken, "{}", queue.name());
        assert_eq!(queue.targets[0].deploy_failed, broken, "{}", queue.name());
        assert_eq!(queue.targets[0].id.is_some(), !broken, "{}", queue.name());
        for child in &queue.children {
            assert!(!child.deploy_failed, "{}", child.name());
        }
    }
}

#[tokio::test]
async fn one_failing_object_does_not_stop_its_siblings() {
    let h = harness(composite_queues_store(), FakeApi::new().failing("Broken"), DeployState::new());
    let mut manifest = composite_queues_manifest();

    let err = h.use_case.apply(&mut manifest).await.unwrap_err();

    match err {
        FerryError::PhaseFailed { phase, failures } => {
            assert_eq!(phase, Phase::FirstDeploy);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].object.id, 11);
        }
        other => panic!("unexpected {other:?}"),
    }

    // Intermediary results are saved for every queue that made it
    let saved = h.manifests.saved.lock().unwrap().clone().unwrap();
    let state = h.state.state.lock().unwrap();
    for (index, (queue, schema, inbox)) in [(10, 20, 30), (12, 22, 32)].into_iter().enumerate() {
        let entry = &saved.queues[index * 2];
        let queue_id = entry.entry.targets[0].id.unwrap();
        let schema_id = entry.schema.targets[0].id.unwrap();
        let inbox_id = entry.inbox.as_ref().unwrap().targets[0].id.unwrap();
        assert!(state
            .get_last_applied(ResourceType::Queue, queue, queue_id, Direction::Forward)
            .is_some());
        assert!(state
            .get_last_applied(ResourceType::Schema, schema, schema_id, Direction::Forward)
            .is_some());
        assert!(state
            .get_last_applied(ResourceType::Inbox, inbox, inbox_id, Direction::Forward)
            .is_some());
    }
    assert_eq!(saved.queues[1].entry.targets[0].id, None);
    assert_eq!(saved.queues[1].inbox.as_ref().unwrap().targets[0].id, None);
    // The broken queue's schema was created before the queue failed
    assert!(saved.queues[1].schema.targets[0].id.is_some());
    assert_eq!(state.len(), 7);

    let failed_events = h
        .events
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, ReleaseEvent::ObjectFailed { .. }))
        .count();
    assert_eq!(failed_events, 1);
}

fn drifted_hook_setup() -> (MemoryStore, FakeApi, DeployState) {
    let store = MemoryStore::default().with(
        ResourceType::Hook,
        json!({"id": 1, "name": "Validate", "active": true, "config": {"timeout": 30}}),
    );
    let api = FakeApi::new().with(
        ResourceType::Hook,
        70,
        json!({"name": "Validate", "active": false, "config": {"timeout": 60}, "status": "ready"}),
    );
    let mut state = DeployState::new();
    state.record(
        ResourceType::Hook,
        1,
        70,
        Direction::Forward,
        json!({"name": "Validate", "active": true, "config": {"timeout": 10}}),
        Vec::new(),
        Utc::now(),
    );
    (store, api, state)
}

fn single_hook_manifest() -> Manifest {
    Manifest {
        hooks: vec![ManifestEntry::new(1, "Validate", vec![target(Some(70))])],
        ..Manifest::default()
    }
}

#[tokio::test]
async fn plan_shows_drift_and_conflicts() {
    let (store, api, state) = drifted_hook_setup();
    let h = harness(store, api, state);

    let plan = h.use_case.plan(&single_hook_manifest()).await.unwrap();

    assert!(plan.has_conflicts());
    let comparison = plan.entries[0].comparison.as_ref().unwrap();
    assert_eq!(comparison.rebase_candidates.get("active"), Some(&json!(false)));
    let conflict = comparison.conflicts.get("config.timeout").unwrap();
    assert_eq!(conflict.source, json!(30));
    assert_eq!(conflict.target, json!(60));
    assert_eq!(plan.entries[0].action, PlanAction::Update);
}

#[tokio::test]
async fn declined_conflict_stops_before_deploying() {
    let (store, api, state) = drifted_hook_setup();
    let h = harness(store, api, state);
    let use_case = h.use_case.with_prompt(Arc::new(crate::domain::ports::AutoDecline));

    let err = use_case.apply(&mut single_hook_manifest()).await.unwrap_err();

    assert!(matches!(err, FerryError::PhaseFailed { phase: Phase::Compare, .. }));
    assert!(h.api.calls().iter().all(|c| !c.starts_with("PATCH")));
}

#[tokio::test]
async fn accepted_rebase_is_written_to_the_snapshot() {
    let store = MemoryStore::default().with(
        ResourceType::Hook,
        json!({"id": 1, "name": "Validate", "active": true, "config": {"timeout": 30}}),
    );
    let api = FakeApi::new().with(
        ResourceType::Hook,
        70,
        json!({"name": "Validate", "active": false, "config": {"timeout": 30}}),
    );
    let mut state = DeployState::new();
    state.record(
        ResourceType::Hook,
        1,
        70,
        Direction::Forward,
        json!({"name": "Validate", "active": true, "config": {"timeout": 30}}),
        Vec::new(),
        Utc::now(),
    );
    let h = harness(store, api, state);
    let mut manifest = single_hook_manifest();

    h.use_case.apply(&mut manifest).await.unwrap();

    let writes = h.use_case.object_store.writes.lock().unwrap().clone();
    assert_eq!(writes.len(), 1);
    let (ty, id, written) = &writes[0];
    assert_eq!((*ty, *id), (ResourceType::Hook, 1));
    assert_eq!(written["active"], json!(false));
    assert_eq!(written["config"], json!({"timeout": 30}));

    // The restaged payload already matches the target
    assert!(h.api.calls().iter().all(|c| !c.starts_with("PATCH")));
    let last = h
        .state
        .state
        .lock()
        .unwrap()
        .get_last_applied(ResourceType::Hook, 1, 70, Direction::Forward)
        .cloned()
        .unwrap();
    assert_eq!(last["active"], json!(false));

    let plan = h.use_case.plan(&manifest).await.unwrap();
    let comparison = plan.entries[0].comparison.as_ref().unwrap();
    assert!(comparison.rebase_candidates.is_empty());
    assert!(comparison.conflicts.is_empty());
    assert_eq!(plan.entries[0].action, PlanAction::Unchanged);
}

/// A hook changed on the source whose target was edited after the last deploy
fn remotely_modified_hook_setup() -> (MemoryStore, FakeApi, DeployState) {
    let store = MemoryStore::default().with(
        ResourceType::Hook,
        json!({"id": 1, "name": "Validate v2", "active": true}),
    );
    let api = FakeApi::new().with(
        ResourceType::Hook,
        70,
        json!({"name": "Validate", "active": true, "modified_at": "2030-01-01T00:00:00Z"}),
    );
    let mut state = DeployState::new();
    state.record(
        ResourceType::Hook,
        1,
        70,
        Direction::Forward,
        json!({"name": "Validate", "active": true}),
        Vec::new(),
        "2026-01-01T00:00:00Z".parse().unwrap(),
    );
    (store, api, state)
}

#[tokio::test]
async fn declined_overwrite_of_a_newer_target_stops_before_deploying() {
    let (store, api, state) = remotely_modified_hook_setup();
    let h = harness(store, api, state);
    let use_case = h.use_case.with_prompt(Arc::new(crate::domain::ports::AutoDecline));

    let err = use_case.apply(&mut single_hook_manifest()).await.unwrap_err();

    match err {
        FerryError::PhaseFailed { phase, failures } => {
            assert_eq!(phase, Phase::Compare);
            assert_eq!(failures.len(), 1);
            assert!(failures[0].message.contains("target 70 was modified at 2030-01-01"));
            assert!(failures[0].message.contains("after the last deploy at 2026-01-01"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(h.api.calls().iter().all(|c| !c.starts_with("PATCH")));
    assert_eq!(h.api.get(ResourceType::Hook, 70).unwrap()["name"], json!("Validate"));
}

#[tokio::test]
async fn plan_warns_about_a_newer_target_and_continues() {
    let (store, api, state) = remotely_modified_hook_setup();
    let h = harness(store, api, state);

    let plan = h.use_case.plan(&single_hook_manifest()).await.unwrap();

    let entry = &plan.entries[0];
    assert_eq!(entry.action, PlanAction::Update);
    assert_eq!(entry.payload["name"], json!("Validate v2"));
    assert!(entry
        .warnings
        .iter()
        .any(|w| w.contains("target 70 was modified at 2030-01-01")));
    assert!(h.api.calls().iter().all(|c| !c.starts_with("PATCH")));
}

#[tokio::test]
async fn hook_template_is_matched_by_name() {
    let store = MemoryStore::default().with(
        ResourceType::Hook,
        json!({"id": 1, "name": "Validate", "hook_template": "https://s/v1/hook_templates/3", "queues": []}),
    );
    let mut api = FakeApi::new();
    api.hook_templates = json!({"results": [
        {"name": "Other", "url": "https://t/v1/hook_templates/8"},
        {"name": "Validate", "url": "https://t/v1/hook_templates/9"}
    ]});
    let h = harness(store, api, DeployState::new());
    let manifest = Manifest {
        hooks: vec![ManifestEntry::new(1, "Validate", vec![target(None)])],
        ..Manifest::default()
    };

    let plan = h.use_case.plan(&manifest).await.unwrap();

    assert_eq!(plan.entries[0].payload["hook_template"], json!("https://t/v1/hook_templates/9"));
}

#[tokio::test]
async fn missing_snapshot_fails_initialization() {
    let h = harness(MemoryStore::default(), FakeApi::new(), DeployState::new());
    let manifest = Manifest {
        hooks: vec![ManifestEntry::new(1, "Gone", vec![target(None)])],
        ..Manifest::default()
    };

    let err = h.use_case.plan(&manifest).await.unwrap_err();

    match err {
        FerryError::PhaseFailed { phase, failures } => {
            assert_eq!(phase, Phase::Initialize);
            assert!(failures[0].message.contains("not found"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn revert_deletes_dependents_first_and_tolerates_missing_targets() {
    let api = FakeApi::new()
        .with(ResourceType::Queue, 100, json!({"name": "Invoices"}))
        .with(ResourceType::Schema, 200, json!({"name": "Invoice schema"}))
        .with(ResourceType::Hook, 70, json!({"name": "Validate"}));
    let mut state = DeployState::new();
    for (ty, source, target) in [
        (ResourceType::Queue, 10, 100),
        (ResourceType::Schema, 20, 200),
        (ResourceType::Hook, 1, 70),
        (ResourceType::Hook, 2, 71),
    ] {
        state.record(ty, source, target, Direction::Forward, json!({}), Vec::new(), Utc::now());
    }
    let h = harness(MemoryStore::default(), api, state);
    let mut manifest = Manifest {
        queues: vec![QueueEntry {
            entry: ManifestEntry::new(10, "Invoices", vec![target(Some(100))]),
            schema: ManifestEntry::new(20, "Invoice schema", vec![target(Some(200))]),
            ..QueueEntry::default()
        }],
        hooks: vec![
            ManifestEntry::new(1, "Validate", vec![target(Some(70))]),
            // Already deleted on the target
            ManifestEntry::new(2, "Gone", vec![target(Some(71))]),
        ],
        ..Manifest::default()
    };

    let result = h.use_case.revert(&mut manifest).await.unwrap();

    assert_eq!(result.deleted.len(), 4);
    assert_eq!(result.purged, 4);
    assert!(h.state.state.lock().unwrap().is_empty());
    assert!(manifest.hooks.iter().all(|e| e.targets[0].id.is_none()));
    assert_eq!(manifest.queues[0].entry.targets[0].id, None);

    let deletes: Vec<String> = h
        .api
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("DELETE"))
        .collect();
    let position = |call: &str| deletes.iter().position(|c| c == call).unwrap();
    assert!(position("DELETE hooks 70") < position("DELETE queues 100"));
    assert!(position("DELETE queues 100") < position("DELETE schemas 200"));
}

fn single_queue_revert(api: FakeApi) -> (Harness, Manifest) {
    let mut state = DeployState::new();
    state.record(ResourceType::Queue, 10, 100, Direction::Forward, json!({}), Vec::new(), Utc::now());
    let h = harness(MemoryStore::default(), api, state);
    let manifest = Manifest {
        queues: vec![QueueEntry {
            entry: ManifestEntry::new(10, "Invoices", vec![target(Some(100))]),
            schema: ManifestEntry::new(20, "Invoice schema", vec![target(None)]),
            ..QueueEntry::default()
        }],
        ..Manifest::default()
    };
    (h, manifest)
}

fn queue_polls(api: &FakeApi) -> usize {
    api.calls().iter().filter(|c| *c == "GET queues 100").count()
}

#[tokio::test]
async fn revert_waits_for_a_queue_deletion_to_complete() {
    let api = FakeApi::new()
        .with(ResourceType::Queue, 100, json!({"name": "Invoices"}))
        .lingers_after_delete(ResourceType::Queue, 100, 2);
    let (h, mut manifest) = single_queue_revert(api);

    let result = h.use_case.revert(&mut manifest).await.unwrap();

    assert_eq!(result.deleted.len(), 1);
    assert_eq!(queue_polls(&h.api), 3);
    assert_eq!(manifest.queues[0].entry.targets[0].id, None);
    assert!(h.state.state.lock().unwrap().is_empty());
}

#[tokio::test]
async fn revert_fails_when_a_queue_outlives_its_polling_budget() {
    let api = FakeApi::new()
        .with(ResourceType::Queue, 100, json!({"name": "Invoices"}))
        .lingers_after_delete(ResourceType::Queue, 100, 5);
    let (h, mut manifest) = single_queue_revert(api);

    let err = h.use_case.revert(&mut manifest).await.unwrap_err();

    match err {
        FerryError::PhaseFailed { phase, failures } => {
            assert_eq!(phase, Phase::Revert);
            assert_eq!(failures.len(), 1);
            assert!(failures[0].message.contains("still exists after 3 checks"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(queue_polls(&h.api), 3);
    // The queue is still tracked so a later revert can retry it
    assert_eq!(manifest.queues[0].entry.targets[0].id, Some(100));
    assert_eq!(h.state.state.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn reverse_manifest_swaps_source_and_target_ids() {
    let store = MemoryStore::default().with(ResourceType::Hook, hook(1, "Validate", vec![]));
    let h = harness(store, FakeApi::new(), DeployState::new());
    let manifest = single_hook_manifest();

    let reversed = h.use_case.reverse_manifest(&manifest).unwrap();

    assert_eq!(reversed.hooks[0].id, 70);
    assert_eq!(reversed.hooks[0].targets[0].id, Some(1));
}

#[tokio::test]
async fn purge_forgets_every_target_of_a_source_object() {
    let mut state = DeployState::new();
    state.record(ResourceType::Hook, 1, 70, Direction::Forward, json!({}), Vec::new(), Utc::now());
    state.record(ResourceType::Hook, 1, 80, Direction::Forward, json!({}), Vec::new(), Utc::now());
    let h = harness(MemoryStore::default(), FakeApi::new(), state);

    assert!(h.use_case.purge(ResourceType::Hook, 1).unwrap());
    assert!(h.state.state.lock().unwrap().is_empty());
    assert!(!h.use_case.purge(ResourceType::Hook, 1).unwrap());
    assert!(h.api.calls().is_empty());
}
