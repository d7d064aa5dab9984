//! Dramatis - agent-scenario orchestration runtime.
//!
//! Scenarios are instantiated from templates, spawn one agent instance per
//! declared role, and advance by routing events between LLM-backed engines
//! (actor, narrator, analyst) according to a declarative event-flow graph:
//! - Leased SQLite event queue with priorities, retries, and stale-lease recovery
//! - Engine registry with heartbeats and capability declarations
//! - Declarative event routing with turn-taking
//! - Snapshot/resume of in-flight scenarios
//! - Axum control-plane API for external engines and scenario commands

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::models::Config;
pub use infrastructure::database::DatabaseConnection;
