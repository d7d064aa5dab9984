//! LLM adapters: the HTTP client and a scriptable mock.

pub mod client;
pub mod mock;
pub mod retry;

pub use client::HttpLlmClient;
pub use mock::MockLlmClient;
pub use retry::RetryPolicy;
