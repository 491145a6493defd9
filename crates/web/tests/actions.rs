//! Action handler scenarios driven through the router
//!
//! Uses an in-memory SQLite store, a fixed-token identity provider and either
//! a recording fake runner or the real executor over temporary scripts.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

use vboxdash_common::{InstancePatch, InstanceStore, NewInstance, PowerStatus, ScriptStatus, SqliteStore};
use vboxdash_host::{HostConfig, Platform, ScriptOutcome, ScriptRunner};
use vboxdash_web::{router, AppState, AuthError, IdentityProvider, StoreProvider};

const TOKEN: &str = "token-alice";
const USER: &str = "alice";

struct FixedIdentity;

#[async_trait]
impl IdentityProvider for FixedIdentity {
    async fn verify(&self, token: &str) -> Result<String, AuthError> {
        match token {
            TOKEN => Ok(USER.to_string()),
            "token-bob" => Ok("bob".to_string()),
            _ => Err(AuthError::InvalidToken),
        }
    }
}

/// Store mutation applied while a given script is "running".
struct MidScript {
    script: &'static str,
    id: String,
    patch: InstancePatch,
}

#[derive(Default)]
struct FakeRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    outcomes: Mutex<HashMap<String, ScriptOutcome>>,
    mid_script: Mutex<Option<MidScript>>,
    store: Mutex<Option<Arc<SqliteStore>>>,
}

impl FakeRunner {
    fn respond(&self, script: &str, outcome: ScriptOutcome) {
        self.outcomes.lock().insert(script.to_string(), outcome);
    }

    fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().clone()
    }

    fn scripts(&self) -> Vec<String> {
        self.calls().into_iter().map(|(s, _)| s).collect()
    }
}

#[async_trait]
impl ScriptRunner for FakeRunner {
    async fn execute(&self, script: &str, args: &[String]) -> ScriptOutcome {
        self.calls.lock().push((script.to_string(), args.to_vec()));

        let pending = {
            let mut slot = self.mid_script.lock();
            if slot.as_ref().map_or(false, |m| m.script == script) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(m) = pending {
            let store = self.store.lock().clone().expect("store for mid-script hook");
            store.update_instance(&m.id, m.patch).await.unwrap();
        }

        self.outcomes
            .lock()
            .get(script)
            .cloned()
            .unwrap_or_else(|| ScriptOutcome::succeeded("ok"))
    }
}

struct Harness {
    app: Router,
    store: Arc<SqliteStore>,
    runner: Arc<FakeRunner>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open_memory().unwrap());
    let runner = Arc::new(FakeRunner::default());
    *runner.store.lock() = Some(store.clone());

    let state = AppState::new(
        HostConfig::for_platform(Platform::current(), dir.path()),
        runner.clone(),
        Arc::new(FixedIdentity),
        StoreProvider::Shared(store.clone()),
    );
    Harness {
        app: router(Arc::new(state)),
        store,
        runner,
        _dir: dir,
    }
}

async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn web1() -> Value {
    json!({"name": "web1", "os": "Ubuntu", "cpu": 2, "ram": 4, "storage": 20})
}

async fn seed(store: &SqliteStore, name: &str) -> String {
    store
        .insert_instance(NewInstance::provisioning(USER, name, "Ubuntu", 2, 4, 20))
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn create_success_completes_the_row() {
    let h = harness();

    let (status, body) = call(&h.app, "POST", "/api/servers/create", Some(TOKEN), Some(web1())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "web1");
    assert_eq!(body["script_status"], "completed");
    assert_eq!(body["script_error"], Value::Null);
    assert_eq!(body["status"], "stopped");
    assert!(body.get("redirectTo").is_none());

    assert_eq!(
        h.runner.calls(),
        vec![(
            "create_vm.sh".to_string(),
            vec!["web1", "Ubuntu", "2", "4", "20"].into_iter().map(String::from).collect()
        )]
    );
}

#[tokio::test]
async fn create_failure_keeps_row_and_redirects() {
    let h = harness();
    h.runner
        .respond("create_vm.sh", ScriptOutcome::failed("", "[ERROR] disk full"));

    let (status, body) = call(&h.app, "POST", "/api/servers/create", Some(TOKEN), Some(web1())).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_str().unwrap().to_string();
    assert_eq!(body["redirectTo"], format!("/servers/{}/progress", id));
    assert_eq!(body["script_status"], "failed");

    let row = h.store.get_instance(&id, USER).await.unwrap().unwrap();
    assert_eq!(row.script_status, ScriptStatus::Failed);
    assert!(row.script_error.unwrap().contains("disk full"));
}

#[tokio::test]
async fn create_records_services_and_users() {
    let h = harness();
    let mut request = web1();
    request["services"] = json!(["nginx", {"service_name": "postgres"}]);
    request["users"] = json!([{"username": "deploy", "sudo": true}]);

    let (status, body) = call(&h.app, "POST", "/api/servers/create", Some(TOKEN), Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_str().unwrap();

    let services = h.store.list_services(id).await.unwrap();
    let mut names: Vec<_> = services.iter().map(|s| s.service_name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["nginx", "postgres"]);
    assert!(services.iter().all(|s| s.status == "installed"));

    let users = h.store.list_users(id).await.unwrap();
    assert_eq!(users.len(), 1);
    assert!(users[0].sudo);
}

#[tokio::test]
async fn duplicate_create_runs_no_script() {
    let h = harness();
    seed(&h.store, "web1").await;

    let (status, body) = call(&h.app, "POST", "/api/servers/create", Some(TOKEN), Some(web1())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "A server with this name already exists");
    assert!(h.runner.calls().is_empty());
    assert_eq!(h.store.list_instances(USER).await.unwrap().len(), 1);
}

#[tokio::test]
async fn validation_and_auth_short_circuit() {
    let h = harness();

    let (status, body) = call(&h.app, "POST", "/api/servers/create", None, Some(web1())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized - No token provided");

    let (status, body) = call(&h.app, "GET", "/api/servers", Some("forged"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized - Invalid token");

    let (status, body) = call(
        &h.app,
        "POST",
        "/api/servers/create",
        Some(TOKEN),
        Some(json!({"name": "web1", "os": "Ubuntu", "cpu": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required fields");

    let id = seed(&h.store, "web1").await;
    let (status, body) = call(
        &h.app,
        "POST",
        &format!("/api/servers/{}/snapshots/create", id),
        Some(TOKEN),
        Some(json!({"name": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Snapshot name is required");

    let (status, body) = call(
        &h.app,
        "POST",
        &format!("/api/servers/{}/users/create", id),
        Some(TOKEN),
        Some(json!({"username": "deploy"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Username and password are required");

    let (status, body) = call(
        &h.app,
        "POST",
        &format!("/api/servers/{}/services/install", id),
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Service name is required");

    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn other_users_instances_are_not_found() {
    let h = harness();
    let id = seed(&h.store, "web1").await;

    for (method, path) in [
        ("GET", format!("/api/servers/{}", id)),
        ("POST", format!("/api/servers/{}/stop", id)),
        ("POST", format!("/api/servers/{}/delete", id)),
        ("GET", format!("/api/servers/{}/metrics", id)),
    ] {
        let (status, body) = call(&h.app, method, &path, Some("token-bob"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, path);
        assert_eq!(body["error"], "Instance not found");
    }
    assert!(h.runner.calls().is_empty());
    assert!(h.store.get_instance(&id, USER).await.unwrap().is_some());
}

#[tokio::test]
async fn delete_removes_row_for_every_outcome() {
    let outcomes = [
        ScriptOutcome::succeeded("destroyed"),
        ScriptOutcome::failed("", "[ERROR] VM is locked"),
        ScriptOutcome::failed("", "Failed to spawn sh: No such file or directory"),
    ];

    for outcome in outcomes {
        let h = harness();
        let id = seed(&h.store, "web1").await;
        let success = outcome.success;
        h.runner.respond("destroy_vm.sh", outcome.clone());

        let (status, body) = call(&h.app, "POST", &format!("/api/servers/{}/delete", id), Some(TOKEN), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(h.store.get_instance(&id, USER).await.unwrap().is_none());
        assert_eq!(h.runner.scripts(), vec!["destroy_vm.sh".to_string()]);

        if success {
            assert_eq!(body["message"], "Server deleted successfully");
            assert!(body.get("scriptResult").is_none());
        } else {
            assert_eq!(body["message"], "Server record deleted (script execution may have failed)");
            assert_eq!(body["scriptResult"], outcome.error_message());
        }
    }
}

#[tokio::test]
async fn stop_failure_keeps_status_read_after_script() {
    let h = harness();
    let id = seed(&h.store, "web1").await;
    h.runner.respond("stop-vm.sh", ScriptOutcome::failed("", "[ERROR] VM is busy"));
    *h.runner.mid_script.lock() = Some(MidScript {
        script: "stop-vm.sh",
        id: id.clone(),
        patch: InstancePatch::default().with_status(PowerStatus::Running),
    });

    let (status, body) = call(&h.app, "POST", &format!("/api/servers/{}/stop", id), Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "[ERROR] VM is busy");

    let row = h.store.get_instance(&id, USER).await.unwrap().unwrap();
    assert_eq!(row.status, PowerStatus::Running);
    assert_eq!(row.script_status, ScriptStatus::Failed);
}

#[tokio::test]
async fn stop_success_marks_stopped() {
    let h = harness();
    let id = seed(&h.store, "web1").await;
    h.store
        .update_instance(&id, InstancePatch::default().with_status(PowerStatus::Running))
        .await
        .unwrap();
    h.runner.respond("stop-vm.sh", ScriptOutcome::succeeded("VM web1 powered off\n"));

    let (status, body) = call(&h.app, "POST", &format!("/api/servers/{}/stop", id), Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "VM web1 powered off");

    let row = h.store.get_instance(&id, USER).await.unwrap().unwrap();
    assert_eq!(row.status, PowerStatus::Stopped);
    assert_eq!(row.script_status, ScriptStatus::Completed);
}

#[tokio::test]
async fn start_reports_missing_vm() {
    let h = harness();
    let id = seed(&h.store, "web1").await;
    h.runner.respond(
        "start-vm.sh",
        ScriptOutcome::failed("", "[ERROR] VM 'web1' does not exist"),
    );

    let (status, body) = call(&h.app, "POST", &format!("/api/servers/{}/start", id), Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["needsCreation"], true);

    let row = h.store.get_instance(&id, USER).await.unwrap().unwrap();
    assert_eq!(row.status, PowerStatus::Stopped);
}

#[tokio::test]
async fn start_success_marks_running() {
    let h = harness();
    let id = seed(&h.store, "web1").await;

    let (status, body) = call(&h.app, "POST", &format!("/api/servers/{}/start", id), Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let row = h.store.get_instance(&id, USER).await.unwrap().unwrap();
    assert_eq!(row.status, PowerStatus::Running);
    assert_eq!(h.runner.calls(), vec![("start-vm.sh".to_string(), vec!["web1".to_string()])]);
}

#[tokio::test]
async fn retry_reruns_create_script() {
    let h = harness();
    let id = seed(&h.store, "web1").await;
    h.store
        .update_instance(&id, InstancePatch::script_finished(false, Some("[ERROR] disk full".into())))
        .await
        .unwrap();

    let (status, body) = call(&h.app, "POST", &format!("/api/servers/{}/retry-script", id), Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scriptStatus"], "completed");

    let row = h.store.get_instance(&id, USER).await.unwrap().unwrap();
    assert_eq!(row.script_status, ScriptStatus::Completed);
    assert_eq!(row.script_error, None);
    assert_eq!(h.runner.scripts(), vec!["create_vm.sh".to_string()]);
}

#[tokio::test]
async fn clone_copies_children_and_rejects_taken_name() {
    let h = harness();
    let (_, body) = call(
        &h.app,
        "POST",
        "/api/servers/create",
        Some(TOKEN),
        Some(json!({"name": "web1", "os": "Ubuntu", "cpu": 2, "ram": 4, "storage": 20, "services": ["nginx"]})),
    )
    .await;
    let source = body["id"].as_str().unwrap().to_string();

    let (status, body) = call(&h.app, "POST", &format!("/api/servers/{}/clone", source), Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    let clone_id = body["id"].as_str().unwrap();
    let clone = h.store.get_instance(clone_id, USER).await.unwrap().unwrap();
    assert_eq!(clone.name, "web1-copy-1");
    assert_eq!(clone.script_status, ScriptStatus::Completed);
    assert_eq!(h.store.list_services(clone_id).await.unwrap().len(), 1);
    assert_eq!(
        h.runner.calls().last().unwrap(),
        &("clone_vm.sh".to_string(), vec!["web1".to_string(), "web1-copy-1".to_string()])
    );

    let before = h.runner.calls().len();
    let (status, body) = call(
        &h.app,
        "POST",
        &format!("/api/servers/{}/clone", source),
        Some(TOKEN),
        Some(json!({"name": "web1-copy-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "A server with this clone name already exists");
    assert_eq!(h.runner.calls().len(), before);
}

#[tokio::test]
async fn install_failure_persists_failed_service() {
    let h = harness();
    let id = seed(&h.store, "web1").await;
    h.runner
        .respond("install_service.sh", ScriptOutcome::failed("", "[ERROR] apt lock held"));

    let (status, body) = call(
        &h.app,
        "POST",
        &format!("/api/servers/{}/services/install", id),
        Some(TOKEN),
        Some(json!({"service": "nginx"})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "[ERROR] apt lock held");
    assert_eq!(body["data"]["status"], "failed");

    let services = h.store.list_services(&id).await.unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].status, "failed");
}

#[tokio::test]
async fn add_user_passes_credentials_to_script() {
    let h = harness();
    let id = seed(&h.store, "web1").await;

    let (status, body) = call(
        &h.app,
        "POST",
        &format!("/api/servers/{}/users/create", id),
        Some(TOKEN),
        Some(json!({"username": "deploy", "password": "p$ss 'word'", "sudo": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "deploy");
    assert_eq!(
        h.runner.calls(),
        vec![(
            "manage_users.sh".to_string(),
            vec!["web1", "deploy", "p$ss 'word'", "true"].into_iter().map(String::from).collect()
        )]
    );
}

#[tokio::test]
async fn snapshots_run_their_scripts() {
    let h = harness();
    let id = seed(&h.store, "web1").await;

    let (status, body) = call(
        &h.app,
        "POST",
        &format!("/api/servers/{}/snapshots/create", id),
        Some(TOKEN),
        Some(json!({"name": " before-upgrade "})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "name": "before-upgrade"}));

    h.runner.respond(
        "restore_snapshot.sh",
        ScriptOutcome::failed("", "[ERROR] snapshot not found"),
    );
    let (status, body) = call(
        &h.app,
        "POST",
        &format!("/api/servers/{}/snapshots/restore", id),
        Some(TOKEN),
        Some(json!({"name": "before-upgrade"})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);

    assert_eq!(
        h.runner.scripts(),
        vec!["create_snapshot.sh".to_string(), "restore_snapshot.sh".to_string()]
    );
}

#[tokio::test]
async fn metrics_fall_back_to_zeros() {
    let h = harness();
    let id = seed(&h.store, "web1").await;
    let uri = format!("/api/servers/{}/metrics", id);

    h.runner.respond("vm-metrics.sh", ScriptOutcome::succeeded("not-json"));
    let (status, body) = call(&h.app, "GET", &uri, Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metrics"], json!({"cpu": 0.0, "ram_used": 0.0, "ram_total": 0.0}));

    h.runner.respond(
        "vm-metrics.sh",
        ScriptOutcome::succeeded("{\"cpu\": 37.5, \"ram_used\": 1024, \"ram_total\": 4096}"),
    );
    let (_, body) = call(&h.app, "GET", &uri, Some(TOKEN), None).await;
    assert_eq!(body["metrics"]["cpu"], 37.5);
    assert_eq!(body["metrics"]["ram_total"], 4096.0);
}

#[tokio::test]
async fn metrics_script_failure_reports_zeros() {
    let h = harness();
    let id = seed(&h.store, "web1").await;
    h.runner.respond(
        "vm-metrics.sh",
        ScriptOutcome::failed("", "[ERROR] VM web1 is not running"),
    );

    let (status, body) = call(&h.app, "GET", &format!("/api/servers/{}/metrics", id), Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"success": true, "metrics": {"cpu": 0.0, "ram_used": 0.0, "ram_total": 0.0}})
    );
    assert_eq!(h.runner.calls(), vec![("vm-metrics.sh".to_string(), vec!["web1".to_string()])]);
}

#[tokio::test]
async fn list_and_detail_are_scoped_to_caller() {
    let h = harness();
    let id = seed(&h.store, "web1").await;
    h.store
        .insert_instance(NewInstance::provisioning("bob", "db1", "Debian", 1, 2, 10))
        .await
        .unwrap();

    let (status, body) = call(&h.app, "GET", "/api/servers", Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "web1");

    let (status, body) = call(&h.app, "GET", &format!("/api/servers/{}", id), Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instance"]["id"], id);
    assert_eq!(body["services"], json!([]));
    assert_eq!(body["users"], json!([]));
}

#[tokio::test]
async fn health_needs_no_token() {
    let h = harness();
    let (status, body) = call(&h.app, "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
