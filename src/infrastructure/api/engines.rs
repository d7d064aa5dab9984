//! Engine control and event-queue endpoints.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::models::engine::{
    EngineCapabilities, EngineInstance, EngineStatus, EngineType, Heartbeat, ResourceLimits,
};
use crate::domain::models::event::EventInstance;
use crate::domain::ports::engine_registry::SystemHealth;
use crate::domain::ports::event_store::LeaseRequest;

use super::state::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/engines/register", post(register_engine))
        .route("/engines/:engine_id/heartbeat", put(update_heartbeat))
        .route(
            "/engines/:engine_id",
            get(get_engine).delete(deregister_engine),
        )
        .route("/engines", get(list_engines))
        .route("/engines/health/system", get(system_health))
        .route("/engines/metrics/:engine_id", get(engine_metrics))
        .route("/engines/queue/request", post(request_events))
        .route("/engines/events/:event_id/status", put(update_event_status))
        // Compatibility form of the lease call; same store behind both.
        .route("/events/queue/:engine_type", get(legacy_queue))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    engine_type: EngineType,
    #[serde(default)]
    engine_id_hint: String,
    #[serde(default)]
    capabilities: EngineCapabilities,
    #[serde(default)]
    resource_limits: ResourceLimits,
    #[serde(default)]
    metadata: Option<Value>,
}

async fn register_engine(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<EngineInstance>, ApiError> {
    let engine = EngineInstance::register(
        request.engine_type,
        &request.engine_id_hint,
        request.capabilities,
        request.resource_limits,
        request.metadata,
    );
    state.registry.insert(&engine).await?;
    Ok(Json(engine))
}

async fn update_heartbeat(
    State(state): State<AppState>,
    Path(engine_id): Path<String>,
    Json(heartbeat): Json<Heartbeat>,
) -> Result<Json<EngineInstance>, ApiError> {
    let engine = state.registry.heartbeat(&engine_id, &heartbeat).await?;
    Ok(Json(engine))
}

/// Deregistering releases the engine's leased events back to the queue
/// before the record is removed.
async fn deregister_engine(
    State(state): State<AppState>,
    Path(engine_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.registry.get(&engine_id).await?;
    let released = state.event_store.release_engine_leases(&engine_id).await?;
    state.registry.delete(&engine_id).await?;
    Ok(Json(json!({
        "status": "success",
        "released_events": released,
    })))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    engine_type: Option<String>,
    status: Option<String>,
}

async fn list_engines(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<EngineInstance>>, ApiError> {
    let engine_type = match query.engine_type.as_deref() {
        Some(raw) => Some(
            EngineType::parse_str(raw)
                .ok_or_else(|| ApiError::bad_request(format!("unknown engine type '{raw}'")))?,
        ),
        None => None,
    };
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            EngineStatus::parse_str(raw)
                .ok_or_else(|| ApiError::bad_request(format!("unknown status '{raw}'")))?,
        ),
        None => None,
    };
    Ok(Json(state.registry.list(engine_type, status).await?))
}

async fn get_engine(
    State(state): State<AppState>,
    Path(engine_id): Path<String>,
) -> Result<Json<EngineInstance>, ApiError> {
    Ok(Json(state.registry.get(&engine_id).await?))
}

async fn system_health(
    State(state): State<AppState>,
) -> Result<Json<SystemHealth>, ApiError> {
    let engines = state.registry.list(None, None).await?;
    let counts = state.event_store.queue_counts(None).await?;
    let now = Utc::now();

    let mut health = SystemHealth {
        total_engines: engines.len() as u64,
        queued_events: counts.queued,
        processing_events: counts.processing,
        failed_events: counts.failed,
        ..Default::default()
    };
    for engine in &engines {
        match engine.status {
            EngineStatus::Healthy => health.healthy_engines += 1,
            EngineStatus::Degraded => health.degraded_engines += 1,
            EngineStatus::Unhealthy => health.unhealthy_engines += 1,
        }
        if engine.is_stale(now) {
            health.stale_engines += 1;
        }
    }
    health.system_health = if health.healthy_engines == 0 {
        "critical"
    } else if health.unhealthy_engines > health.healthy_engines
        || health.stale_engines > 0
        || health.degraded_engines > 0
    {
        "degraded"
    } else {
        "healthy"
    }
    .to_string();

    Ok(Json(health))
}

async fn engine_metrics(
    State(state): State<AppState>,
    Path(engine_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let engine = state.registry.get(&engine_id).await?;
    let uptime_hours = (Utc::now() - engine.created_at).num_seconds() as f64 / 3600.0;
    Ok(Json(json!({
        "engine_id": engine.id,
        "engine_type": engine.engine_type,
        "status": engine.status,
        "current_workload": engine.current_workload,
        "active_agents": engine.active_agents,
        "processed_events_count": engine.processed_events_count,
        "error_count": engine.error_count,
        "last_heartbeat": engine.last_heartbeat,
        "uptime_hours": uptime_hours,
    })))
}

#[derive(Debug, Deserialize)]
struct QueueRequest {
    engine_type: EngineType,
    engine_id: String,
    max_events: u32,
    #[serde(default)]
    priority_filter: Vec<i64>,
    #[serde(default)]
    event_type_filter: Vec<String>,
}

/// Canonical lease call. The engine must exist and be in a processing
/// status; validation of `max_events` happens in the store.
async fn request_events(
    State(state): State<AppState>,
    Json(request): Json<QueueRequest>,
) -> Result<Json<Vec<EventInstance>>, ApiError> {
    let engine = state.registry.get(&request.engine_id).await?;
    if !engine.status.can_process() {
        return Err(ApiError::bad_request(format!(
            "engine {} is {} and cannot process events",
            engine.id,
            engine.status.as_str()
        )));
    }

    let mut lease = LeaseRequest::new(request.engine_type, request.engine_id, request.max_events);
    lease.priority_filter = request.priority_filter;
    lease.event_type_filter = request.event_type_filter;
    Ok(Json(state.event_store.lease(lease).await?))
}

#[derive(Debug, Deserialize)]
struct LegacyQueueQuery {
    engine_id: String,
    #[serde(default = "default_max_events")]
    max_events: u32,
    /// Comma-separated capability names
    #[serde(default)]
    capabilities: Option<String>,
}

fn default_max_events() -> u32 {
    5
}

/// Path-parameter form kept for engine clients predating the request-body
/// API. Backed by the same lease operation.
async fn legacy_queue(
    State(state): State<AppState>,
    Path(engine_type): Path<String>,
    Query(query): Query<LegacyQueueQuery>,
) -> Result<Json<Vec<EventInstance>>, ApiError> {
    let engine_type = EngineType::parse_str(&engine_type)
        .ok_or_else(|| ApiError::bad_request(format!("unknown engine type '{engine_type}'")))?;
    state.registry.get(&query.engine_id).await?;

    let mut lease = LeaseRequest::new(engine_type, query.engine_id, query.max_events);
    if let Some(raw) = query.capabilities {
        lease.required_capabilities = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    Ok(Json(state.event_store.lease(lease).await?))
}

#[derive(Debug, Deserialize)]
struct EventStatusUpdate {
    engine_id: String,
    status: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    processing_time_ms: Option<u64>,
}

/// Status update from a worker. Must come from the current lease holder.
async fn update_event_status(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(update): Json<EventStatusUpdate>,
) -> Result<Json<Value>, ApiError> {
    match update.status.as_str() {
        "completed" => {
            let mut result = update.result.unwrap_or_else(|| json!({}));
            if let (Value::Object(map), Some(ms)) = (&mut result, update.processing_time_ms) {
                map.insert("processing_time_ms".into(), json!(ms));
            }
            let event = state
                .event_store
                .complete(event_id, &update.engine_id, result)
                .await?;
            Ok(Json(json!({
                "status": "success",
                "event_status": event.status,
            })))
        }
        "failed" | "retrying" => {
            let error = update.error.unwrap_or_else(|| "unspecified error".into());
            let event = state
                .event_store
                .fail(event_id, &update.engine_id, &error)
                .await?;
            Ok(Json(json!({
                "status": "success",
                "event_status": event.status,
                "retry_count": event.retry_count,
                "next_retry_time": event.next_retry_time,
            })))
        }
        "processing" => {
            // Leasing already marked it processing; acknowledge only.
            let event = state.event_store.get(event_id).await?;
            Ok(Json(json!({
                "status": "success",
                "event_status": event.status,
            })))
        }
        other => Err(ApiError::bad_request(format!(
            "unsupported status '{other}'; expected processing, completed, failed, or retrying"
        ))),
    }
}
