//! VM lifecycle action handlers
//!
//! Each action follows the same choreography: resolve the caller's instance,
//! mark the script phase as running where one is tracked, run the script,
//! apply the action's primary database change whatever the script did, then
//! write the script outcome back. Script failures are reported in the
//! response body; only store failures abort a handler.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};
use vboxdash_common::{
    Instance, InstancePatch, NewInstance, NewService, NewVmUser, PowerStatus, ScriptStatus, Service, VmMetrics,
};
use vboxdash_host::{EnvironmentSummary, ScriptOutcome};

use crate::activity::{self, ActivityKind};
use crate::auth::Caller;
use crate::error::ApiError;
use crate::server::AppState;

/// Provisioning script names.
pub mod scripts {
    pub const CREATE: &str = "create_vm.sh";
    pub const CLONE: &str = "clone_vm.sh";
    pub const DESTROY: &str = "destroy_vm.sh";
    pub const START: &str = "start-vm.sh";
    pub const STOP: &str = "stop-vm.sh";
    pub const INSTALL_SERVICE: &str = "install_service.sh";
    pub const MANAGE_USERS: &str = "manage_users.sh";
    pub const CREATE_SNAPSHOT: &str = "create_snapshot.sh";
    pub const RESTORE_SNAPSHOT: &str = "restore_snapshot.sh";
    pub const METRICS: &str = "vm-metrics.sh";
}

pub const DUPLICATE_NAME: &str = "A server with this name already exists";
pub const DUPLICATE_CLONE_NAME: &str = "A server with this clone name already exists";

// ============================================================================
// Request bodies
// ============================================================================

/// A service given either as a bare name or as `{ "service_name": ... }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ServiceSpec {
    Name(String),
    Object { service_name: String },
}

impl ServiceSpec {
    pub fn into_name(self) -> String {
        match self {
            Self::Name(name) | Self::Object { service_name: name } => name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserSpec {
    pub username: String,
    #[serde(default)]
    pub sudo: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateServerRequest {
    pub name: Option<String>,
    pub os: Option<String>,
    pub cpu: Option<u32>,
    pub ram: Option<u32>,
    pub storage: Option<u32>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub users: Vec<UserSpec>,
}

/// Create request after validation, services normalized to names
#[derive(Debug)]
pub struct ServerSpec {
    pub name: String,
    pub os: String,
    pub cpu: u32,
    pub ram: u32,
    pub storage: u32,
    pub services: Vec<String>,
    pub users: Vec<UserSpec>,
}

impl CreateServerRequest {
    pub fn validate(self) -> Result<ServerSpec, ApiError> {
        let missing = || ApiError::bad_request("Missing required fields");
        let name = non_blank(self.name).ok_or_else(missing)?;
        let os = non_blank(self.os).ok_or_else(missing)?;
        let positive = |v: Option<u32>| v.filter(|n| *n > 0);
        let cpu = positive(self.cpu).ok_or_else(missing)?;
        let ram = positive(self.ram).ok_or_else(missing)?;
        let storage = positive(self.storage).ok_or_else(missing)?;

        Ok(ServerSpec {
            name,
            os,
            cpu,
            ram,
            storage,
            services: self
                .services
                .into_iter()
                .map(ServiceSpec::into_name)
                .filter(|s| !s.trim().is_empty())
                .collect(),
            users: self.users.into_iter().filter(|u| !u.username.trim().is_empty()).collect(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct NameRequest {
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InstallServiceRequest {
    pub service: Option<ServiceSpec>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AddUserRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub sudo: bool,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn body_or_default<T: Default>(body: Option<Json<T>>) -> T {
    body.map(|Json(b)| b).unwrap_or_default()
}

// ============================================================================
// Helpers
// ============================================================================

async fn load_owned(caller: &Caller, id: &str, context: &'static str) -> Result<Instance, ApiError> {
    caller
        .store
        .get_instance(id, &caller.user_id)
        .await
        .map_err(ApiError::store(context))?
        .ok_or(ApiError::NotFound)
}

/// Write the script's terminal status and diagnostic back to the row.
async fn finish_script(
    caller: &Caller,
    id: &str,
    outcome: &ScriptOutcome,
    context: &'static str,
) -> Result<(), ApiError> {
    caller
        .store
        .update_instance(id, InstancePatch::script_finished(outcome.success, outcome.error.clone()))
        .await
        .map_err(ApiError::store(context))
}

/// 500 response for a script failure whose database side effects were kept.
fn script_failure(outcome: &ScriptOutcome, fallback: &str, extra: Value) -> Response {
    let message = outcome.error.clone().unwrap_or_else(|| fallback.to_string());
    let mut body = json!({
        "success": false,
        "error": message,
        "message": message,
    });
    if let (Some(map), Value::Object(extra)) = (body.as_object_mut(), extra) {
        map.extend(extra);
    }
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

fn progress_path(id: &str) -> String {
    format!("/servers/{}/progress", id)
}

fn script_message(outcome: &ScriptOutcome, fallback: &str) -> String {
    let output = outcome.output.trim();
    if output.is_empty() {
        fallback.to_string()
    } else {
        output.to_string()
    }
}

/// Whether a start failure means the VM itself is missing on the host.
fn needs_creation(diagnostic: &str) -> bool {
    let lower = diagnostic.to_lowercase();
    if lower.starts_with("script not found") {
        return false;
    }
    lower.contains("does not exist")
        || lower.contains("not found")
        || lower.contains("could not find a registered machine")
}

// ============================================================================
// Environment
// ============================================================================

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "vboxdash-web",
        "version": vboxdash_common::VERSION,
    }))
}

async fn run_checks(state: &AppState) -> Option<Vec<vboxdash_host::Check>> {
    let prober = state.prober.clone();
    match tokio::spawn(async move { prober.check_environment().await }).await {
        Ok(checks) => Some(checks),
        Err(e) => {
            error!("Error checking environment: {}", e);
            None
        }
    }
}

fn environment_failure() -> Response {
    ApiError::Internal("Failed to check environment".to_string()).into_response()
}

pub async fn environment_check(State(state): State<Arc<AppState>>) -> Response {
    match run_checks(&state).await {
        Some(checks) => Json(checks).into_response(),
        None => environment_failure(),
    }
}

pub async fn environment_status(State(state): State<Arc<AppState>>) -> Response {
    match run_checks(&state).await {
        Some(checks) => Json(json!({
            "summary": EnvironmentSummary::from_checks(&checks),
            "checks": checks,
        }))
        .into_response(),
        None => environment_failure(),
    }
}

// ============================================================================
// Servers
// ============================================================================

pub async fn list_servers(caller: Caller) -> Result<Response, ApiError> {
    let instances = caller
        .store
        .list_instances(&caller.user_id)
        .await
        .map_err(ApiError::store("Failed to fetch servers"))?;
    Ok(Json(instances).into_response())
}

pub async fn get_server(caller: Caller, Path(id): Path<String>) -> Result<Response, ApiError> {
    const CONTEXT: &str = "Failed to fetch server";
    let instance = load_owned(&caller, &id, CONTEXT).await?;
    let services = caller.store.list_services(&id).await.map_err(ApiError::store(CONTEXT))?;
    let users = caller.store.list_users(&id).await.map_err(ApiError::store(CONTEXT))?;
    Ok(Json(json!({
        "instance": instance,
        "services": services,
        "users": users,
    }))
    .into_response())
}

pub async fn create_server(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    body: Option<Json<CreateServerRequest>>,
) -> Result<Response, ApiError> {
    const CONTEXT: &str = "Failed to create server";
    let spec = body_or_default(body).validate()?;

    let new = NewInstance::provisioning(&caller.user_id, &spec.name, &spec.os, spec.cpu, spec.ram, spec.storage);
    let instance = match caller.store.insert_instance(new).await {
        Ok(instance) => instance,
        Err(e) if e.is_conflict() => return Err(ApiError::Conflict(DUPLICATE_NAME.to_string())),
        Err(e) => return Err(ApiError::store(CONTEXT)(e)),
    };
    info!("Created instance {} ({}) for {}", instance.id, instance.name, caller.user_id);

    let outcome = state.runner.execute(scripts::CREATE, &instance.create_args()).await;
    finish_script(&caller, &instance.id, &outcome, CONTEXT).await?;
    if !outcome.success {
        warn!("Provisioning {} failed: {}", instance.name, outcome.error_message());
    }

    let services: Vec<NewService> = spec
        .services
        .into_iter()
        .map(|service_name| NewService {
            instance_id: instance.id.clone(),
            service_name,
            status: Service::INSTALLED.to_string(),
        })
        .collect();
    caller.store.insert_services(services).await.map_err(ApiError::store(CONTEXT))?;

    let users: Vec<NewVmUser> = spec
        .users
        .into_iter()
        .map(|u| NewVmUser {
            instance_id: instance.id.clone(),
            username: u.username,
            sudo: u.sudo,
        })
        .collect();
    caller.store.insert_users(users).await.map_err(ApiError::store(CONTEXT))?;

    let current = caller
        .store
        .get_instance(&instance.id, &caller.user_id)
        .await
        .map_err(ApiError::store(CONTEXT))?
        .unwrap_or(instance);

    activity::record(&current.id, ActivityKind::Create, outcome.success, &current.name);

    let mut body = serde_json::to_value(&current).map_err(|e| ApiError::Internal(e.to_string()))?;
    if !outcome.success {
        body["redirectTo"] = json!(progress_path(&current.id));
    }
    Ok(Json(body).into_response())
}

pub async fn clone_server(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    body: Option<Json<NameRequest>>,
) -> Result<Response, ApiError> {
    const CONTEXT: &str = "Failed to clone server";
    let request = body_or_default(body);
    let source = load_owned(&caller, &id, CONTEXT).await?;
    let name = non_blank(request.name).unwrap_or_else(|| format!("{}-copy-1", source.name));

    let existing = caller
        .store
        .find_instance_by_name(&caller.user_id, &name)
        .await
        .map_err(ApiError::store(CONTEXT))?;
    if existing.is_some() {
        return Err(ApiError::Conflict(DUPLICATE_CLONE_NAME.to_string()));
    }

    let new = NewInstance::provisioning(&caller.user_id, &name, &source.os, source.cpu, source.ram, source.storage);
    let clone = match caller.store.insert_instance(new).await {
        Ok(clone) => clone,
        Err(e) if e.is_conflict() => return Err(ApiError::Conflict(DUPLICATE_CLONE_NAME.to_string())),
        Err(e) => return Err(ApiError::store(CONTEXT)(e)),
    };

    let services = caller.store.list_services(&source.id).await.map_err(ApiError::store(CONTEXT))?;
    let users = caller.store.list_users(&source.id).await.map_err(ApiError::store(CONTEXT))?;

    let outcome = state
        .runner
        .execute(scripts::CLONE, &[source.name.clone(), name.clone()])
        .await;
    finish_script(&caller, &clone.id, &outcome, CONTEXT).await?;

    let services = services
        .into_iter()
        .map(|s| NewService {
            instance_id: clone.id.clone(),
            service_name: s.service_name,
            status: Service::INSTALLED.to_string(),
        })
        .collect();
    caller.store.insert_services(services).await.map_err(ApiError::store(CONTEXT))?;

    let users = users
        .into_iter()
        .map(|u| NewVmUser {
            instance_id: clone.id.clone(),
            username: u.username,
            sudo: u.sudo,
        })
        .collect();
    caller.store.insert_users(users).await.map_err(ApiError::store(CONTEXT))?;

    activity::record(&clone.id, ActivityKind::Clone, outcome.success, &format!("{} -> {}", source.name, name));

    let mut body = json!({ "id": clone.id });
    if !outcome.success {
        body["redirectTo"] = json!(progress_path(&clone.id));
    }
    Ok(Json(body).into_response())
}

pub async fn delete_server(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    const CONTEXT: &str = "Failed to delete server";
    let instance = load_owned(&caller, &id, CONTEXT).await?;
    caller
        .store
        .update_instance(&id, InstancePatch::script_running())
        .await
        .map_err(ApiError::store(CONTEXT))?;

    let outcome = state.runner.execute(scripts::DESTROY, &[instance.name.clone()]).await;

    // The row goes regardless of what the destroy script reported.
    caller
        .store
        .delete_instance(&id, &caller.user_id)
        .await
        .map_err(ApiError::store(CONTEXT))?;

    activity::record(&id, ActivityKind::Delete, outcome.success, &instance.name);

    let mut body = json!({
        "success": true,
        "message": if outcome.success {
            "Server deleted successfully"
        } else {
            "Server record deleted (script execution may have failed)"
        },
    });
    if !outcome.success {
        body["scriptResult"] = json!(outcome.error_message());
    }
    Ok(Json(body).into_response())
}

pub async fn stop_server(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    const CONTEXT: &str = "Failed to stop server";
    let instance = load_owned(&caller, &id, CONTEXT).await?;
    caller
        .store
        .update_instance(&id, InstancePatch::script_running())
        .await
        .map_err(ApiError::store(CONTEXT))?;

    let outcome = state.runner.execute(scripts::STOP, &[instance.name.clone()]).await;

    // Narrow re-read: a failed stop keeps whatever status is current now,
    // not the value read before the script ran.
    let current_status = caller
        .store
        .get_instance(&id, &caller.user_id)
        .await
        .map_err(ApiError::store(CONTEXT))?
        .map(|i| i.status)
        .unwrap_or(PowerStatus::Stopped);
    let status = if outcome.success { PowerStatus::Stopped } else { current_status };

    caller
        .store
        .update_instance(
            &id,
            InstancePatch::script_finished(outcome.success, outcome.error.clone()).with_status(status),
        )
        .await
        .map_err(ApiError::store(CONTEXT))?;

    activity::record(&id, ActivityKind::Stop, outcome.success, &instance.name);

    if !outcome.success {
        return Ok(script_failure(&outcome, CONTEXT, json!({})));
    }
    Ok(Json(json!({
        "success": true,
        "message": script_message(&outcome, "Server stopped successfully"),
    }))
    .into_response())
}

/// Boots an existing VM with `start-vm.sh`; re-provisioning is `retry_script`.
pub async fn start_server(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    const CONTEXT: &str = "Failed to start server";
    let instance = load_owned(&caller, &id, CONTEXT).await?;
    caller
        .store
        .update_instance(&id, InstancePatch::script_running())
        .await
        .map_err(ApiError::store(CONTEXT))?;

    let outcome = state.runner.execute(scripts::START, &[instance.name.clone()]).await;

    let mut patch = InstancePatch::script_finished(outcome.success, outcome.error.clone());
    if outcome.success {
        patch = patch.with_status(PowerStatus::Running);
    }
    caller
        .store
        .update_instance(&id, patch)
        .await
        .map_err(ApiError::store(CONTEXT))?;

    activity::record(&id, ActivityKind::Start, outcome.success, &instance.name);

    if !outcome.success {
        let extra = if needs_creation(outcome.error_message()) {
            json!({ "needsCreation": true })
        } else {
            json!({})
        };
        return Ok(script_failure(&outcome, CONTEXT, extra));
    }
    Ok(Json(json!({
        "success": true,
        "message": script_message(&outcome, "Server started successfully"),
    }))
    .into_response())
}

/// Re-runs `create_vm.sh` with the row's stored spec.
pub async fn retry_script(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    const CONTEXT: &str = "Failed to retry script";
    let instance = load_owned(&caller, &id, CONTEXT).await?;
    caller
        .store
        .update_instance(&id, InstancePatch::script_running().with_script_error(None))
        .await
        .map_err(ApiError::store(CONTEXT))?;

    let outcome = state.runner.execute(scripts::CREATE, &instance.create_args()).await;
    finish_script(&caller, &id, &outcome, CONTEXT).await?;

    activity::record(&id, ActivityKind::Create, outcome.success, &format!("retry {}", instance.name));

    let script_status = ScriptStatus::from_outcome(outcome.success);
    if !outcome.success {
        return Ok(script_failure(
            &outcome,
            "Script execution failed",
            json!({ "scriptStatus": script_status }),
        ));
    }
    Ok(Json(json!({
        "success": true,
        "message": "Script execution completed successfully",
        "scriptStatus": script_status,
    }))
    .into_response())
}

pub async fn install_service(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    body: Option<Json<InstallServiceRequest>>,
) -> Result<Response, ApiError> {
    const CONTEXT: &str = "Failed to install service";
    let service = body_or_default(body)
        .service
        .map(ServiceSpec::into_name)
        .and_then(|s| non_blank(Some(s)))
        .ok_or_else(|| ApiError::bad_request("Service name is required"))?;

    let instance = load_owned(&caller, &id, CONTEXT).await?;
    let outcome = state
        .runner
        .execute(scripts::INSTALL_SERVICE, &[instance.name.clone(), service.clone()])
        .await;

    let status = if outcome.success { Service::INSTALLED } else { Service::FAILED };
    let row = caller
        .store
        .insert_services(vec![NewService {
            instance_id: id.clone(),
            service_name: service.clone(),
            status: status.to_string(),
        }])
        .await
        .map_err(ApiError::store(CONTEXT))?
        .into_iter()
        .next();

    activity::record(&id, ActivityKind::InstallService, outcome.success, &service);

    if !outcome.success {
        return Ok(script_failure(&outcome, CONTEXT, json!({ "data": row })));
    }
    Ok(Json(json!({
        "success": true,
        "message": format!("{} installed successfully", service),
        "data": row,
    }))
    .into_response())
}

pub async fn add_user(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    body: Option<Json<AddUserRequest>>,
) -> Result<Response, ApiError> {
    const CONTEXT: &str = "Failed to add user";
    let request = body_or_default(body);
    let (username, password) = match (non_blank(request.username), request.password.filter(|p| !p.is_empty())) {
        (Some(username), Some(password)) => (username, password),
        _ => return Err(ApiError::bad_request("Username and password are required")),
    };

    let instance = load_owned(&caller, &id, CONTEXT).await?;
    let outcome = state
        .runner
        .execute(
            scripts::MANAGE_USERS,
            &[
                instance.name.clone(),
                username.clone(),
                password,
                request.sudo.to_string(),
            ],
        )
        .await;

    let row = caller
        .store
        .insert_users(vec![NewVmUser {
            instance_id: id.clone(),
            username: username.clone(),
            sudo: request.sudo,
        }])
        .await
        .map_err(ApiError::store(CONTEXT))?
        .into_iter()
        .next();

    activity::record(&id, ActivityKind::AddUser, outcome.success, &username);

    if !outcome.success {
        return Ok(script_failure(&outcome, CONTEXT, json!({ "data": row })));
    }
    Ok(Json(json!({ "success": true, "data": row })).into_response())
}

async fn run_snapshot(
    state: &AppState,
    caller: Caller,
    id: &str,
    body: Option<Json<NameRequest>>,
    script: &str,
    kind: ActivityKind,
    context: &'static str,
) -> Result<Response, ApiError> {
    let snapshot = non_blank(body_or_default(body).name)
        .ok_or_else(|| ApiError::bad_request("Snapshot name is required"))?;

    let instance = load_owned(&caller, id, context).await?;
    let outcome = state
        .runner
        .execute(script, &[instance.name.clone(), snapshot.clone()])
        .await;

    activity::record(id, kind, outcome.success, &snapshot);

    if !outcome.success {
        return Ok(script_failure(&outcome, context, json!({})));
    }
    Ok(Json(json!({ "success": true, "name": snapshot })).into_response())
}

pub async fn create_snapshot(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    body: Option<Json<NameRequest>>,
) -> Result<Response, ApiError> {
    run_snapshot(
        &state,
        caller,
        &id,
        body,
        scripts::CREATE_SNAPSHOT,
        ActivityKind::SnapshotCreate,
        "Failed to create snapshot",
    )
    .await
}

pub async fn restore_snapshot(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    body: Option<Json<NameRequest>>,
) -> Result<Response, ApiError> {
    run_snapshot(
        &state,
        caller,
        &id,
        body,
        scripts::RESTORE_SNAPSHOT,
        ActivityKind::SnapshotRestore,
        "Failed to restore snapshot",
    )
    .await
}

pub async fn metrics(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let instance = load_owned(&caller, &id, "Failed to fetch metrics").await?;
    let outcome = state.runner.execute(scripts::METRICS, &[instance.name.clone()]).await;

    // Telemetry hiccups are not errors for the dashboard.
    let metrics = if outcome.success {
        VmMetrics::parse(&outcome.output).unwrap_or_else(|| {
            warn!("Unparseable metrics for {}: {:?}", instance.name, outcome.output);
            VmMetrics::default()
        })
    } else {
        VmMetrics::default()
    };

    Ok(Json(json!({ "success": true, "metrics": metrics })).into_response())
}
