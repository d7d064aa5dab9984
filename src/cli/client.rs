//! HTTP client for CLI commands against a running coordinator.

use anyhow::Context;
use serde_json::Value;
use thiserror::Error;

use crate::domain::models::config::ServerConfig;

/// CLI-facing error with a process exit code.
///
/// 0 success, 1 generic failure, 2 template/validation error, 3
/// scenario-not-found, 4 engine-not-found.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Generic(String),

    #[error("{0}")]
    TemplateOrValidation(String),

    #[error("{0}")]
    ScenarioNotFound(String),

    #[error("{0}")]
    EngineNotFound(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Generic(_) => 1,
            Self::TemplateOrValidation(_) => 2,
            Self::ScenarioNotFound(_) => 3,
            Self::EngineNotFound(_) => 4,
        }
    }

    fn classify(status: reqwest::StatusCode, message: String) -> Self {
        let lowered = message.to_lowercase();
        if status == reqwest::StatusCode::NOT_FOUND {
            if lowered.contains("template") {
                return Self::TemplateOrValidation(message);
            }
            if lowered.contains("engine") {
                return Self::EngineNotFound(message);
            }
            if lowered.contains("scenario") {
                return Self::ScenarioNotFound(message);
            }
        }
        if status == reqwest::StatusCode::BAD_REQUEST {
            return Self::TemplateOrValidation(message);
        }
        Self::Generic(message)
    }
}

impl From<anyhow::Error> for CliError {
    fn from(error: anyhow::Error) -> Self {
        Self::Generic(format!("{error:#}"))
    }
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(server: &ServerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("http://{}:{}", server.host, server.port),
        }
    }

    pub async fn get(&self, path: &str) -> Result<Value, CliError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .context("is the coordinator running? (dramatis serve)")?;
        Self::parse(response).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, CliError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .context("is the coordinator running? (dramatis serve)")?;
        Self::parse(response).await
    }

    async fn parse(response: reqwest::Response) -> Result<Value, CliError> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .unwrap_or_else(|_| Value::String("unparseable response".into()));
        if status.is_success() {
            return Ok(body);
        }
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| format!("request failed with {status}"));
        Err(CliError::classify(status, message))
    }
}
