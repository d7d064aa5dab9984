//! SQLite implementation of the template store.
//!
//! Plain CRUD: templates are validated upstream and consumed here.

use async_trait::async_trait;
use indexmap::IndexMap;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::models::engine::EngineType;
use crate::domain::models::flow::EventFlow;
use crate::domain::models::template::{AgentTemplate, ScenarioConfig, ScenarioTemplate};
use crate::domain::ports::errors::StoreError;
use crate::domain::ports::template_store::TemplateStore;

use super::utils::{fmt_ts, parse_json, parse_ts, parse_uuid};

pub struct TemplateRepository {
    pool: SqlitePool,
}

impl TemplateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_scenario_template(
        row: &sqlx::sqlite::SqliteRow,
    ) -> Result<ScenarioTemplate, StoreError> {
        let config: ScenarioConfig =
            serde_json::from_str(row.get::<String, _>("config").as_str())?;
        let agent_roles: IndexMap<String, _> =
            serde_json::from_str(row.get::<String, _>("agent_roles").as_str())?;
        let event_flow: EventFlow =
            serde_json::from_str(row.get::<String, _>("event_flow").as_str())?;

        Ok(ScenarioTemplate {
            id: parse_uuid(row.get::<String, _>("id").as_str())?,
            name: row.get("name"),
            description: row.get("description"),
            config,
            agent_roles,
            event_flow,
            created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
            updated_at: parse_ts(row.get::<String, _>("updated_at").as_str())?,
        })
    }

    fn row_to_agent_template(row: &sqlx::sqlite::SqliteRow) -> Result<AgentTemplate, StoreError> {
        let engine_type_str: String = row.get("engine_type");
        let engine_type = EngineType::parse_str(&engine_type_str)
            .ok_or_else(|| StoreError::Parse(format!("unknown engine type '{engine_type_str}'")))?;

        Ok(AgentTemplate {
            id: parse_uuid(row.get::<String, _>("id").as_str())?,
            name: row.get("name"),
            description: row.get("description"),
            engine_type,
            personality_config: parse_json(row.get("personality_config"))?,
            llm_config: parse_json(row.get("llm_config"))?,
            tools_config: parse_json(row.get("tools_config"))?,
            runtime_overrides: parse_json(row.get("runtime_overrides"))?,
            created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
            updated_at: parse_ts(row.get::<String, _>("updated_at").as_str())?,
        })
    }
}

#[async_trait]
impl TemplateStore for TemplateRepository {
    async fn insert_scenario_template(
        &self,
        template: &ScenarioTemplate,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scenario_templates (
                id, name, description, config, agent_roles, event_flow,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(template.id.to_string())
        .bind(&template.name)
        .bind(&template.description)
        .bind(serde_json::to_string(&template.config)?)
        .bind(serde_json::to_string(&template.agent_roles)?)
        .bind(serde_json::to_string(&template.event_flow)?)
        .bind(fmt_ts(template.created_at))
        .bind(fmt_ts(template.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn scenario_template_by_name(
        &self,
        name: &str,
    ) -> Result<ScenarioTemplate, StoreError> {
        let row = sqlx::query("SELECT * FROM scenario_templates WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("scenario template", name))?;
        Self::row_to_scenario_template(&row)
    }

    async fn scenario_template_by_id(&self, id: Uuid) -> Result<ScenarioTemplate, StoreError> {
        let row = sqlx::query("SELECT * FROM scenario_templates WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("scenario template", id))?;
        Self::row_to_scenario_template(&row)
    }

    async fn insert_agent_template(&self, template: &AgentTemplate) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO agent_templates (
                id, name, description, engine_type, personality_config,
                llm_config, tools_config, runtime_overrides, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(template.id.to_string())
        .bind(&template.name)
        .bind(&template.description)
        .bind(template.engine_type.as_str())
        .bind(serde_json::to_string(&template.personality_config)?)
        .bind(serde_json::to_string(&template.llm_config)?)
        .bind(serde_json::to_string(&template.tools_config)?)
        .bind(serde_json::to_string(&template.runtime_overrides)?)
        .bind(fmt_ts(template.created_at))
        .bind(fmt_ts(template.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn agent_template_by_name(&self, name: &str) -> Result<AgentTemplate, StoreError> {
        let row = sqlx::query("SELECT * FROM agent_templates WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("agent template", name))?;
        Self::row_to_agent_template(&row)
    }

    async fn agent_template_by_id(&self, id: Uuid) -> Result<AgentTemplate, StoreError> {
        let row = sqlx::query("SELECT * FROM agent_templates WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("agent template", id))?;
        Self::row_to_agent_template(&row)
    }
}
