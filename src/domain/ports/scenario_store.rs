//! Scenario store port: scenario runs and agent instances.

use async_trait::async_trait;
use uuid::Uuid;

use super::errors::StoreError;
use crate::domain::models::scenario::{AgentInstance, ScenarioRun, ScenarioStatus};

#[async_trait]
pub trait ScenarioStore: Send + Sync {
    async fn insert_run(&self, run: &ScenarioRun) -> Result<(), StoreError>;

    async fn get_run(&self, run_id: Uuid) -> Result<ScenarioRun, StoreError>;

    /// Persist status, results, turn counter, and timestamps.
    async fn update_run(&self, run: &ScenarioRun) -> Result<(), StoreError>;

    async fn list_runs(
        &self,
        status: Option<ScenarioStatus>,
        limit: u32,
    ) -> Result<Vec<ScenarioRun>, StoreError>;

    async fn insert_agent(&self, agent: &AgentInstance) -> Result<(), StoreError>;

    async fn get_agent(&self, agent_id: Uuid) -> Result<AgentInstance, StoreError>;

    /// Agent instances bound to a scenario run, in creation order.
    async fn agents_for_run(&self, run_id: Uuid) -> Result<Vec<AgentInstance>, StoreError>;

    /// Persist an agent's runtime state blob.
    async fn update_agent_state(
        &self,
        agent_id: Uuid,
        state: &serde_json::Value,
    ) -> Result<(), StoreError>;
}
