//! Shared API state and error mapping.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::domain::ports::engine_registry::EngineRegistry;
use crate::domain::ports::errors::StoreError;
use crate::domain::ports::event_store::EventStore;
use crate::domain::ports::scenario_store::ScenarioStore;
use crate::services::scenario_runner::{ScenarioError, ScenarioRunner};

#[derive(Clone)]
pub struct AppState {
    pub event_store: Arc<dyn EventStore>,
    pub registry: Arc<dyn EngineRegistry>,
    pub scenario_store: Arc<dyn ScenarioStore>,
    pub runner: Arc<ScenarioRunner>,
}

/// JSON error envelope with a mapped status code.
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        let status = match &error {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::LeaseMismatch { .. } => StatusCode::FORBIDDEN,
            StoreError::Validation(_) => StatusCode::BAD_REQUEST,
            StoreError::InvalidTransition(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl From<ScenarioError> for ApiError {
    fn from(error: ScenarioError) -> Self {
        let status = match &error {
            ScenarioError::TemplateNotFound(_)
            | ScenarioError::AgentTemplateNotFound(_)
            | ScenarioError::RunNotFound(_)
            | ScenarioError::AgentNotFound(_) => StatusCode::NOT_FOUND,
            ScenarioError::InvalidState { .. }
            | ScenarioError::CorruptSnapshot(_)
            | ScenarioError::Transition(_) => StatusCode::CONFLICT,
            ScenarioError::Store(store_error) => return Self::from_store_ref(store_error),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl ApiError {
    fn from_store_ref(error: &StoreError) -> Self {
        let status = match error {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::LeaseMismatch { .. } => StatusCode::FORBIDDEN,
            StoreError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}
