//! Apply a release, then revert it.

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ferry::domain::ports::ManifestRepository;
use ferry::infrastructure::YamlManifestRepository;
use ferry::{PlanAction, ResourceType};

use crate::common::*;

fn created(server: &MockServer, id: i64, name: &str) -> ResponseTemplate {
    ResponseTemplate::new(201).set_body_json(json!({
        "id": id,
        "url": format!("{}/api/v1/hooks/{id}", server.uri()),
        "name": name,
    }))
}

#[tokio::test]
async fn plan_apply_revert_round_trip() {
    let release = ReleaseDir::new();
    release.write_snapshot(ResourceType::Hook, hook(1, "Validate", &[]));
    release.write_snapshot(ResourceType::Hook, hook(2, "Export", &[1]));
    release.write_manifest(TWO_HOOKS_MANIFEST);

    let server = MockServer::start().await;
    let target = format!("{}/api/v1", server.uri());
    Mock::given(method("POST"))
        .and(path("/api/v1/hooks"))
        .and(body_partial_json(json!({"name": "Validate"})))
        .respond_with(created(&server, 501, "Validate"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/hooks"))
        .and(body_partial_json(json!({"name": "Export"})))
        .respond_with(created(&server, 502, "Export"))
        .expect(1)
        .mount(&server)
        .await;
    // Second pass links Export to the Validate hook created in the same run
    Mock::given(method("PATCH"))
        .and(path("/api/v1/hooks/502"))
        .and(body_partial_json(json!({"run_after": [format!("{target}/hooks/501")]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 502})))
        .expect(1)
        .mount(&server)
        .await;

    let use_case = release.use_case(&target);
    let mut manifest = YamlManifestRepository::new(release.manifest_path())
        .load()
        .unwrap();

    // Plan: nothing exists yet
    let plan = use_case.plan(&manifest).await.unwrap();
    assert_eq!(plan.count(PlanAction::Create), 2);

    // Apply
    let result = use_case.apply(&mut manifest).await.unwrap();
    assert_eq!(result.created.len(), 2);

    let saved = YamlManifestRepository::new(release.manifest_path())
        .load()
        .unwrap();
    assert_eq!(saved.hooks[0].targets[0].id, Some(501));
    assert_eq!(saved.hooks[1].targets[0].id, Some(502));

    let state = release.state_json();
    assert_eq!(
        state["resources"]["hooks"]["2"]["502"]["last_applied"]["run_after"],
        json!([format!("{target}/hooks/501")])
    );
    assert!(state["resources"]["hooks"]["1"]["501"]["deployed_at"].is_string());

    // Revert: dependents first, both targets gone afterwards
    Mock::given(method("DELETE"))
        .and(path("/api/v1/hooks/501"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/hooks/502"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let mut manifest = saved;
    let reverted = use_case.revert(&mut manifest).await.unwrap();
    assert_eq!(reverted.deleted.len(), 2);
    assert_eq!(reverted.purged, 2);

    let saved = YamlManifestRepository::new(release.manifest_path())
        .load()
        .unwrap();
    assert!(saved.hooks.iter().all(|h| h.targets[0].id.is_none()));
    assert_eq!(release.state_json()["resources"], json!({}));
}

#[tokio::test]
async fn missing_snapshot_fails_before_any_remote_call() {
    let release = ReleaseDir::new();
    release.write_snapshot(ResourceType::Hook, hook(1, "Validate", &[]));
    release.write_manifest(TWO_HOOKS_MANIFEST);

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let use_case = release.use_case(&format!("{}/api/v1", server.uri()));
    let mut manifest = YamlManifestRepository::new(release.manifest_path())
        .load()
        .unwrap();

    let err = use_case.apply(&mut manifest).await.unwrap_err();
    assert!(err.to_string().contains("initialize"));
    assert!(err.to_string().contains("Export"));
}
