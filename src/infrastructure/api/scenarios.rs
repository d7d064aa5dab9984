//! Scenario control endpoints, a thin façade over the Scenario Runner.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::models::scenario::ScenarioStatus;
use crate::domain::models::template::ScenarioConfig;
use crate::services::scenario_runner::MonitorReport;

use super::state::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/scenarios/execute-from-template",
            post(execute_from_template),
        )
        .route("/scenarios/:id/dispatch-event", post(dispatch_event))
        .route("/scenarios/active", get(active_scenarios))
        .route("/scenarios/:id/status", get(scenario_status))
        .route("/scenarios/:id/stop", post(stop_scenario))
        .route("/scenarios/:id/resume", post(resume_scenario))
        .route("/scenarios", get(list_scenarios))
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    template_name: String,
    #[serde(default)]
    scenario_config: Option<ScenarioConfig>,
    #[serde(default)]
    agent_configs: Option<HashMap<String, Value>>,
}

async fn execute_from_template(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<Value>, ApiError> {
    let run_id = state
        .runner
        .start_scenario(
            &request.template_name,
            request.scenario_config,
            request.agent_configs,
        )
        .await?;
    Ok(Json(json!({
        "scenario_run_id": run_id,
        "status": "running",
    })))
}

#[derive(Debug, Deserialize)]
struct DispatchRequest {
    event_type: String,
    #[serde(default)]
    event_data: Value,
    #[serde(default)]
    target_agent_id: Option<Uuid>,
}

async fn dispatch_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<Value>, ApiError> {
    let response = state
        .runner
        .send_event_to_scenario(
            id,
            &request.event_type,
            request.event_data,
            request.target_agent_id,
        )
        .await?;
    Ok(Json(response))
}

async fn active_scenarios(
    State(state): State<AppState>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let runs = state.runner.list_active().await?;
    let summaries = runs
        .into_iter()
        .map(|run| {
            json!({
                "id": run.id,
                "name": run.name,
                "status": run.status,
                "started_at": run.started_at,
                "template_id": run.template_id,
            })
        })
        .collect();
    Ok(Json(summaries))
}

async fn scenario_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MonitorReport>, ApiError> {
    Ok(Json(state.runner.monitor_scenario(id).await?))
}

#[derive(Debug, Deserialize)]
struct StopRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn stop_scenario(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StopRequest>,
) -> Result<Json<Value>, ApiError> {
    let reason = request.reason.unwrap_or_else(|| "user_terminated".into());
    state.runner.stop_scenario(id, &reason).await?;
    Ok(Json(json!({
        "scenario_run_id": id,
        "status": "terminated",
        "reason": reason,
    })))
}

async fn resume_scenario(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    state.runner.resume_scenario(id).await?;
    Ok(Json(json!({
        "scenario_run_id": id,
        "status": "running",
    })))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    20
}

async fn list_scenarios(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            ScenarioStatus::parse_str(raw)
                .ok_or_else(|| ApiError::bad_request(format!("unknown status '{raw}'")))?,
        ),
        None => None,
    };
    let runs = state.scenario_store.list_runs(status, query.limit).await?;
    let summaries = runs
        .into_iter()
        .map(|run| {
            json!({
                "id": run.id,
                "name": run.name,
                "status": run.status,
                "current_turn_number": run.current_turn_number,
                "started_at": run.started_at,
                "completed_at": run.completed_at,
                "created_at": run.created_at,
            })
        })
        .collect();
    Ok(Json(summaries))
}
