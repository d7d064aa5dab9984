//! Template store port.
//!
//! Templates are consumed, not owned: validation lives upstream, the runtime
//! needs resolve-by-name reads plus seeding support.

use async_trait::async_trait;

use super::errors::StoreError;
use crate::domain::models::template::{AgentTemplate, ScenarioTemplate};

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn insert_scenario_template(
        &self,
        template: &ScenarioTemplate,
    ) -> Result<(), StoreError>;

    async fn scenario_template_by_name(
        &self,
        name: &str,
    ) -> Result<ScenarioTemplate, StoreError>;

    async fn scenario_template_by_id(
        &self,
        id: uuid::Uuid,
    ) -> Result<ScenarioTemplate, StoreError>;

    async fn insert_agent_template(&self, template: &AgentTemplate) -> Result<(), StoreError>;

    async fn agent_template_by_name(&self, name: &str) -> Result<AgentTemplate, StoreError>;

    async fn agent_template_by_id(&self, id: uuid::Uuid) -> Result<AgentTemplate, StoreError>;
}
