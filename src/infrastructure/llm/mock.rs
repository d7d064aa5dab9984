//! Scriptable LLM client for tests and offline runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::domain::ports::errors::LlmError;
use crate::domain::ports::llm_client::{GenerateRequest, LlmClient};

/// Returns canned replies in order, then falls back to echoing the prompt.
/// Can be programmed to fail the first N calls, every call after the first
/// N, or every call.
pub struct MockLlmClient {
    replies: Mutex<VecDeque<String>>,
    fail_first: AtomicU64,
    fail_after: Option<u64>,
    fail_always: bool,
    calls: AtomicU64,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fail_first: AtomicU64::new(0),
            fail_after: None,
            fail_always: false,
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::new();
        {
            let mut queue = client.replies.lock().unwrap_or_else(|e| e.into_inner());
            queue.extend(replies.into_iter().map(Into::into));
        }
        client
    }

    /// Fail the first `n` calls with a permanent error, then succeed.
    pub fn failing_first(n: u64) -> Self {
        let client = Self::new();
        client.fail_first.store(n, Ordering::SeqCst);
        client
    }

    /// Succeed for the first `n` calls, then fail every call.
    pub fn failing_after(n: u64) -> Self {
        let mut client = Self::new();
        client.fail_after = Some(n);
        client
    }

    /// Fail every call with a permanent error.
    pub fn always_failing() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fail_first: AtomicU64::new(0),
            fail_after: None,
            fail_always: true,
            calls: AtomicU64::new(0),
        }
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError> {
        let call_number = self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_always {
            return Err(LlmError::Permanent("mock configured to fail".into()));
        }
        if let Some(limit) = self.fail_after {
            if call_number >= limit {
                return Err(LlmError::Permanent("mock call budget exhausted".into()));
            }
        }
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(LlmError::Permanent("mock scripted failure".into()));
        }

        let scripted = {
            let mut queue = self.replies.lock().unwrap_or_else(|e| e.into_inner());
            queue.pop_front()
        };
        Ok(scripted.unwrap_or_else(|| format!("echo: {}", request.prompt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_replies_then_echo() {
        let client = MockLlmClient::with_replies(["first", "second"]);
        let req = |p: &str| GenerateRequest::new("sys", p);

        assert_eq!(client.generate(req("a")).await.unwrap(), "first");
        assert_eq!(client.generate(req("b")).await.unwrap(), "second");
        assert_eq!(client.generate(req("c")).await.unwrap(), "echo: c");
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn failing_first_recovers() {
        let client = MockLlmClient::failing_first(2);
        let req = || GenerateRequest::new("sys", "p");

        assert!(client.generate(req()).await.is_err());
        assert!(client.generate(req()).await.is_err());
        assert!(client.generate(req()).await.is_ok());
    }

    #[tokio::test]
    async fn failing_after_budget() {
        let client = MockLlmClient::failing_after(2);
        let req = || GenerateRequest::new("sys", "p");
        assert!(client.generate(req()).await.is_ok());
        assert!(client.generate(req()).await.is_ok());
        assert!(client.generate(req()).await.is_err());
        assert!(client.generate(req()).await.is_err());
    }

    #[tokio::test]
    async fn always_failing_never_recovers() {
        let client = MockLlmClient::always_failing();
        for _ in 0..5 {
            assert!(client
                .generate(GenerateRequest::new("sys", "p"))
                .await
                .is_err());
        }
    }
}
