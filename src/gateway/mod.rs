//! HTTP control surface.
//!
//! Every handler answers `{ "success": bool, "message": string, "data"?: … }`.
//! Failures are mapped to a status code and that same shape; nothing escapes
//! as a bare 500.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{Notify, oneshot, watch};

use crate::control::{ControlHandle, ControlSignal};
use crate::lifecycle::{ProcessSupervisor, SupervisorError};
use crate::sync::{ContactSyncEngine, Pipeline, TriggerOutcome};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<ContactSyncEngine>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub control: ControlHandle,
}

/// Build the axum router with all control-surface routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/status", get(handle_status))
        .route("/api/update_status", get(handle_update_status))
        .route("/api/contacts", get(handle_contacts))
        .route("/api/update_friends", post(handle_update_friends))
        .route("/api/update_rooms", post(handle_update_rooms))
        .route("/api/worker/start", post(handle_worker_start))
        .route("/api/worker/stop", post(handle_worker_stop))
        .route("/api/restart", post(handle_restart))
        .route("/api/config_changed", post(handle_config_changed))
        .route("/api/restart_panel", post(handle_restart_panel))
        .route("/api/logout_remote", post(handle_logout_remote))
        .with_state(state)
}

// ── Response helpers ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ApiReply {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

type ApiResponse = (StatusCode, Json<ApiReply>);

fn ok(message: impl Into<String>) -> ApiResponse {
    reply(StatusCode::OK, true, message, None)
}

fn ok_data(message: impl Into<String>, data: impl Serialize) -> ApiResponse {
    match serde_json::to_value(data) {
        Ok(value) => reply(StatusCode::OK, true, message, Some(value)),
        Err(e) => fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode response: {e}"),
        ),
    }
}

fn fail(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    reply(status, false, message, None)
}

fn reply(
    status: StatusCode,
    success: bool,
    message: impl Into<String>,
    data: Option<serde_json::Value>,
) -> ApiResponse {
    (
        status,
        Json(ApiReply {
            success,
            message: message.into(),
            data,
        }),
    )
}

fn supervisor_err_to_response(e: &SupervisorError) -> ApiResponse {
    let status = match e {
        SupervisorError::NotConfigured => StatusCode::BAD_REQUEST,
        SupervisorError::Busy => StatusCode::CONFLICT,
        SupervisorError::NotReady(_) => StatusCode::GATEWAY_TIMEOUT,
        SupervisorError::Spawn { .. }
        | SupervisorError::ExitedDuringStartup { .. }
        | SupervisorError::SurvivedKill(_)
        | SupervisorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    fail(status, e.to_string())
}

// ── Handlers ─────────────────────────────────────────────────────

async fn handle_health() -> ApiResponse {
    ok_data("ok", crate::health::snapshot_json())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusView {
    worker: crate::lifecycle::WorkerStatus,
    /// `None` when the remote directory is not configured or unreachable.
    online: Option<bool>,
    directory_configured: bool,
}

async fn handle_status(State(state): State<AppState>) -> ApiResponse {
    let worker = state.supervisor.status();
    let online = match state.sync.client() {
        Some(client) => match client.check_online().await {
            Ok(online) => Some(online),
            Err(e) => {
                tracing::warn!("Online check failed: {e}");
                None
            }
        },
        None => None,
    };
    ok_data(
        "ok",
        StatusView {
            worker,
            online,
            directory_configured: state.sync.is_configured(),
        },
    )
}

async fn handle_update_status(State(state): State<AppState>) -> ApiResponse {
    ok_data("ok", state.sync.status().snapshot())
}

#[derive(Debug, Default, Deserialize)]
struct ContactsQuery {
    #[serde(default)]
    force_update: Option<String>,
    #[serde(default)]
    silent: Option<String>,
}

fn flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

async fn handle_contacts(
    State(state): State<AppState>,
    Query(query): Query<ContactsQuery>,
) -> Json<serde_json::Value> {
    let snapshots = state.sync.snapshots();
    let friends_valid = snapshots.is_valid(Pipeline::Friends);
    let groups_valid = snapshots.is_valid(Pipeline::Groups);
    let needs_update =
        flag(query.force_update.as_deref()) || !friends_valid || !groups_valid;

    let names = state.sync.get_contacts_cached();
    let mut body = serde_json::json!({
        "success": true,
        "message": "ok",
        "data": names,
    });
    if needs_update && !flag(query.silent.as_deref()) {
        let message = if !friends_valid && !groups_valid {
            "No contact data found; run a friends and groups refresh first"
        } else {
            "Contact data may be stale; a refresh is recommended"
        };
        body["needs_update"] = serde_json::Value::Bool(true);
        body["message"] = serde_json::Value::from(message);
    }
    Json(body)
}

fn trigger_response(pipeline: Pipeline, outcome: TriggerOutcome) -> ApiResponse {
    match outcome {
        TriggerOutcome::Started => ok(format!("{pipeline} refresh started")),
        TriggerOutcome::AlreadyRunning => fail(
            StatusCode::CONFLICT,
            format!("{pipeline} refresh already in progress"),
        ),
        TriggerOutcome::NotSupported => fail(
            StatusCode::BAD_REQUEST,
            "remote directory is not configured",
        ),
    }
}

async fn handle_update_friends(State(state): State<AppState>) -> ApiResponse {
    tracing::info!("Manual friends refresh requested");
    trigger_response(Pipeline::Friends, state.sync.trigger(Pipeline::Friends))
}

async fn handle_update_rooms(State(state): State<AppState>) -> ApiResponse {
    tracing::info!("Manual groups refresh requested");
    trigger_response(Pipeline::Groups, state.sync.trigger(Pipeline::Groups))
}

async fn handle_worker_start(State(state): State<AppState>) -> ApiResponse {
    match state.supervisor.start().await {
        Ok(status) => ok_data("worker started", status),
        Err(e) => supervisor_err_to_response(&e),
    }
}

async fn handle_worker_stop(State(state): State<AppState>) -> ApiResponse {
    match state.supervisor.stop().await {
        Ok(()) => ok_data("worker stopped", state.supervisor.status()),
        Err(e) => supervisor_err_to_response(&e),
    }
}

async fn handle_restart(State(state): State<AppState>) -> ApiResponse {
    match state.supervisor.restart().await {
        Ok(status) => ok_data("worker restarted", status),
        Err(e) => supervisor_err_to_response(&e),
    }
}

async fn handle_config_changed(State(state): State<AppState>) -> ApiResponse {
    if state.control.send(ControlSignal::RestartWorker) {
        ok("configuration change noted; worker restart queued")
    } else {
        fail(StatusCode::SERVICE_UNAVAILABLE, "control channel unavailable")
    }
}

async fn handle_restart_panel(State(state): State<AppState>) -> ApiResponse {
    tracing::info!("Panel restart requested");
    if state.control.send(ControlSignal::RestartPanel) {
        ok("panel restarting; refresh in a few seconds")
    } else {
        fail(StatusCode::SERVICE_UNAVAILABLE, "control channel unavailable")
    }
}

async fn handle_logout_remote(State(state): State<AppState>) -> ApiResponse {
    let Some(client) = state.sync.client() else {
        return fail(StatusCode::BAD_REQUEST, "remote directory is not configured");
    };
    match client.check_online().await {
        Ok(false) => return ok("account is not logged in"),
        Ok(true) => {}
        Err(e) => return fail(StatusCode::BAD_GATEWAY, format!("online check failed: {e}")),
    }
    match client.logout().await {
        Ok(()) => ok("logged out"),
        Err(e) => fail(StatusCode::BAD_GATEWAY, format!("logout failed: {e}")),
    }
}

// ── Server loop ──────────────────────────────────────────────────

enum ServeExit {
    Restart,
    Shutdown,
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Serve the control surface until `shutdown` flips. Each `panel_restart`
/// notification drains the current listener, waits `restart_delay`, and
/// binds a fresh one. The worker is not touched.
pub async fn run_gateway(
    host: &str,
    port: u16,
    state: AppState,
    panel_restart: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
    restart_delay: Duration,
) -> Result<()> {
    loop {
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("Failed to bind control surface on {host}:{port}"))?;
        let addr = listener.local_addr()?;
        tracing::info!("Control surface listening on http://{addr}");
        crate::health::mark_component_ok("gateway");

        let (exit_tx, exit_rx) = oneshot::channel();
        let restart = Arc::clone(&panel_restart);
        let mut stop = shutdown.clone();
        axum::serve(listener, build_router(state.clone()))
            .with_graceful_shutdown(async move {
                let exit = tokio::select! {
                    () = restart.notified() => ServeExit::Restart,
                    () = shutdown_requested(&mut stop) => ServeExit::Shutdown,
                };
                let _ = exit_tx.send(exit);
            })
            .await
            .context("Control surface server error")?;

        match exit_rx.await.unwrap_or(ServeExit::Shutdown) {
            ServeExit::Shutdown => {
                tracing::info!("Control surface stopped");
                return Ok(());
            }
            ServeExit::Restart => {
                tracing::info!(
                    "Control surface closed; rebinding in {}s",
                    restart_delay.as_secs()
                );
                crate::health::bump_component_restart("gateway");
                tokio::time::sleep(restart_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_accepts_true_and_one() {
        assert!(flag(Some("true")));
        assert!(flag(Some("TRUE")));
        assert!(flag(Some("1")));
        assert!(!flag(Some("false")));
        assert!(!flag(Some("")));
        assert!(!flag(None));
    }

    #[test]
    fn reply_omits_absent_data() {
        let (status, Json(body)) = ok("done");
        assert_eq!(status, StatusCode::OK);
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "message": "done"}));
    }

    #[test]
    fn supervisor_errors_map_to_status_codes() {
        let (status, Json(body)) = supervisor_err_to_response(&SupervisorError::Busy);
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(!body.success);

        let (status, _) = supervisor_err_to_response(&SupervisorError::NotConfigured);
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
