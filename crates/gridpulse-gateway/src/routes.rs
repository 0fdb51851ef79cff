//! API route handlers for the gateway.

use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};
use std::sync::Arc;

use gridpulse_core::error::GridPulseError;
use gridpulse_dispatch::{Capability, CapabilityProvider as _, NewTask, TaskPatch, TaskStatus};

use super::error::ApiError;
use super::server::AppState;

type ApiResult = Result<Json<Value>, ApiError>;

/// System information endpoint.
pub async fn system_info(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime = state.start_time.elapsed();
    Json(json!({
        "service": "gridpulse",
        "version": env!("CARGO_PKG_VERSION"),
        "platform": format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        "uptime_secs": uptime.as_secs(),
        "llm_provider": state.config.llm.provider,
        "poll_interval_secs": state.config.scheduler.poll_interval_secs,
        "providers": state.registry.providers().len(),
        "gateway": {
            "host": state.config.gateway.host,
            "port": state.config.gateway.port,
            "auth_enabled": !state.config.gateway.api_token.is_empty(),
        }
    }))
}

// ─── Task CRUD ────────────────────────────────────────────────

/// List all tasks.
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> ApiResult {
    let tasks = state.store.list()?;
    Ok(Json(json!({"ok": true, "count": tasks.len(), "tasks": tasks})))
}

/// Create a task. The provider/capability pair is validated against the
/// registry up front, so a typo fails the request instead of the run.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewTask>,
) -> ApiResult {
    if new.name.trim().is_empty() {
        return Err(GridPulseError::Validation("'name' must not be empty".into()).into());
    }
    if !state.registry.supports(&new.provider, new.capability) {
        return Err(GridPulseError::Validation(format!(
            "provider '{}' does not offer capability '{}'",
            new.provider, new.capability
        ))
        .into());
    }
    if let Some(parent_id) = &new.parent_task_id {
        state.store.get_existing(parent_id)?;
    }
    let task = state.store.create(new)?;
    Ok(Json(json!({"ok": true, "task": task})))
}

/// Fetch one task.
pub async fn get_task(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let task = state.store.get_existing(&id)?;
    Ok(Json(json!({"ok": true, "task": task})))
}

/// Patch task fields. Rejected once the task has started or terminated.
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult {
    let task = state.store.update_fields(&id, patch)?;
    Ok(Json(json!({"ok": true, "task": task})))
}

/// Delete a task row.
pub async fn delete_task(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    if !state.store.delete(&id)? {
        return Err(GridPulseError::NotFound(format!("task '{id}'")).into());
    }
    Ok(Json(json!({"ok": true, "deleted": id})))
}

/// List tasks with a given status.
pub async fn tasks_by_status(
    State(state): State<Arc<AppState>>,
    Path(status): Path<String>,
) -> ApiResult {
    let status = TaskStatus::parse(&status).ok_or_else(|| {
        GridPulseError::Validation(format!("unknown status '{status}'"))
    })?;
    let tasks = state.store.list_by_status(status)?;
    Ok(Json(json!({"ok": true, "count": tasks.len(), "tasks": tasks})))
}

/// Execute a task synchronously and return it in its final state.
pub async fn execute_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let task = state.executor.execute(&id).await?;
    Ok(Json(json!({"ok": true, "task": task})))
}

/// Cancel a pre-terminal task. Does not abort handler I/O already in flight.
pub async fn cancel_task(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let task = state.store.cancel(&id)?;
    Ok(Json(json!({"ok": true, "task": task})))
}

// ─── Capability introspection ─────────────────────────────────

/// List registered providers and their capabilities.
pub async fn list_providers(State(state): State<Arc<AppState>>) -> ApiResult {
    let mut providers = Vec::new();
    for info in state.registry.providers() {
        let available = match state.registry.get(&info.name) {
            Some(p) => p.is_available().await,
            None => false,
        };
        providers.push(json!({
            "name": info.name,
            "description": info.description,
            "capabilities": info.capabilities,
            "available": available,
        }));
    }
    Ok(Json(json!({"ok": true, "providers": providers})))
}

// ─── Direct analysis shortcuts ────────────────────────────────

/// Run one capability directly, without creating a task row.
async fn direct(
    state: &AppState,
    provider_name: &str,
    capability: Capability,
    params: Value,
) -> ApiResult {
    let provider = state
        .registry
        .get(provider_name)
        .ok_or_else(|| GridPulseError::NotFound(format!("provider '{provider_name}'")))?;
    if !provider.capabilities().contains(&capability) {
        return Err(GridPulseError::NotFound(format!(
            "capability '{capability}' on provider '{provider_name}'"
        ))
        .into());
    }
    if !provider.is_available().await {
        return Err(GridPulseError::Unavailable(format!(
            "provider '{provider_name}' is not configured"
        ))
        .into());
    }
    let missing: Vec<&str> = capability
        .required_params()
        .iter()
        .copied()
        .filter(|key| params.get(key).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(GridPulseError::Validation(format!(
            "missing required parameter(s) for {capability}: {}",
            missing.join(", ")
        ))
        .into());
    }

    let result = provider.execute(capability, &params).await?;
    Ok(Json(json!({
        "ok": true,
        "capability": capability,
        "result": result,
    })))
}

pub async fn analyze_sentiment(
    State(state): State<Arc<AppState>>,
    Json(params): Json<Value>,
) -> ApiResult {
    direct(&state, "insight", Capability::SentimentAnalysis, params).await
}

pub async fn analyze_summarize(
    State(state): State<Arc<AppState>>,
    Json(params): Json<Value>,
) -> ApiResult {
    direct(&state, "insight", Capability::Summarization, params).await
}

pub async fn analyze_anomalies(
    State(state): State<Arc<AppState>>,
    Json(params): Json<Value>,
) -> ApiResult {
    direct(&state, "statistics", Capability::AnomalyDetection, params).await
}

pub async fn analyze_trends(
    State(state): State<Arc<AppState>>,
    Json(params): Json<Value>,
) -> ApiResult {
    direct(&state, "statistics", Capability::TrendAnalysis, params).await
}

pub async fn plan_decompose(
    State(state): State<Arc<AppState>>,
    Json(params): Json<Value>,
) -> ApiResult {
    direct(&state, "insight", Capability::TaskDecomposition, params).await
}
