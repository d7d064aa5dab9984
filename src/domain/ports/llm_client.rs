//! LLM client port.
//!
//! The orchestration core passes prompts in and stores responses; it neither
//! chooses nor tunes models. Implementations live in `infrastructure/llm`.

use async_trait::async_trait;

use super::errors::LlmError;

/// A single generation request: system framing plus a user prompt.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system_prompt: String,
    pub prompt: String,
    /// Model override from the agent's llm_config; falls back to the
    /// client's configured default when None
    pub model: Option<String>,
    pub temperature: Option<f64>,
}

impl GenerateRequest {
    pub fn new(system_prompt: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            prompt: prompt.into(),
            model: None,
            temperature: None,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion for the request.
    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError>;
}
