//! HTTP LLM client speaking the OpenAI-compatible chat-completions shape.
//!
//! The orchestration core treats the model as a text-in/text-out
//! collaborator; this client adds connection pooling, request timeouts, and
//! transient-only retries on top.

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::models::config::LlmConfig;
use crate::domain::ports::errors::LlmError;
use crate::domain::ports::llm_client::{GenerateRequest, LlmClient};

use super::retry::RetryPolicy;

pub struct HttpLlmClient {
    http: ReqwestClient,
    base_url: String,
    api_key: String,
    default_model: String,
    timeout_secs: u64,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| LlmError::Permanent(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            default_model: config.model.clone(),
            timeout_secs: config.timeout_secs,
            retry: RetryPolicy::new(config.max_retries, 1_000, 60_000),
        })
    }

    async fn send_once(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
        };

        let mut http_request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if !self.api_key.is_empty() {
            http_request = http_request.bearer_auth(&self.api_key);
        }

        let response = http_request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.timeout_secs)
            } else {
                LlmError::Transient(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("{status}: {text}");
            // 429 and 5xx are transient; everything else is on us.
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(LlmError::Transient(message))
            } else {
                Err(LlmError::Permanent(message))
            };
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Permanent(format!("malformed response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| LlmError::Permanent("response contained no content".into()))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError> {
        self.retry.execute(|| self.send_once(&request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_chat_shape() {
        let body = ChatRequest {
            model: "test-model",
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are Mara.",
                },
                ChatMessage {
                    role: "user",
                    content: "Say hello.",
                },
            ],
            temperature: Some(0.5),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["temperature"], 0.5);
    }

    #[test]
    fn temperature_omitted_when_absent() {
        let body = ChatRequest {
            model: "m",
            messages: vec![],
            temperature: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn response_parses_content() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "hello"}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hello"));
    }
}
