//! SQLite implementation of the scenario store.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::models::scenario::{AgentInstance, ScenarioRun, ScenarioStatus};
use crate::domain::models::template::ScenarioConfig;
use crate::domain::ports::errors::StoreError;
use crate::domain::ports::scenario_store::ScenarioStore;

use super::utils::{fmt_ts, parse_json, parse_opt_ts, parse_ts, parse_uuid};

pub struct ScenarioRepository {
    pool: SqlitePool,
}

impl ScenarioRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> Result<ScenarioRun, StoreError> {
        let status_str: String = row.get("status");
        let status = ScenarioStatus::parse_str(&status_str).ok_or_else(|| {
            StoreError::Parse(format!("unknown scenario status '{status_str}'"))
        })?;
        let config: ScenarioConfig = match row.get::<Option<String>, _>("config") {
            Some(text) => serde_json::from_str(&text)?,
            None => ScenarioConfig::default(),
        };

        Ok(ScenarioRun {
            id: parse_uuid(row.get::<String, _>("id").as_str())?,
            template_id: parse_uuid(row.get::<String, _>("template_id").as_str())?,
            name: row.get("name"),
            status,
            config,
            results: match row.get::<Option<String>, _>("results") {
                Some(text) => Some(serde_json::from_str(&text)?),
                None => None,
            },
            current_turn_number: row.get::<i64, _>("current_turn_number") as u32,
            started_at: parse_opt_ts(row.get("started_at"))?,
            completed_at: parse_opt_ts(row.get("completed_at"))?,
            created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
        })
    }

    fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<AgentInstance, StoreError> {
        Ok(AgentInstance {
            id: parse_uuid(row.get::<String, _>("id").as_str())?,
            template_id: parse_uuid(row.get::<String, _>("template_id").as_str())?,
            scenario_run_id: parse_uuid(row.get::<String, _>("scenario_run_id").as_str())?,
            instance_name: row.get("instance_name"),
            role_in_scenario: row.get("role_in_scenario"),
            runtime_config: parse_json(row.get("runtime_config"))?,
            state: parse_json(row.get("state"))?,
            created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
        })
    }
}

#[async_trait]
impl ScenarioStore for ScenarioRepository {
    async fn insert_run(&self, run: &ScenarioRun) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scenario_runs (
                id, template_id, name, status, config, results,
                current_turn_number, started_at, completed_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.template_id.to_string())
        .bind(&run.name)
        .bind(run.status.as_str())
        .bind(serde_json::to_string(&run.config)?)
        .bind(run.results.as_ref().map(serde_json::to_string).transpose()?)
        .bind(i64::from(run.current_turn_number))
        .bind(run.started_at.map(fmt_ts))
        .bind(run.completed_at.map(fmt_ts))
        .bind(fmt_ts(run.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<ScenarioRun, StoreError> {
        let row = sqlx::query("SELECT * FROM scenario_runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("scenario run", run_id))?;
        Self::row_to_run(&row)
    }

    async fn update_run(&self, run: &ScenarioRun) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE scenario_runs
            SET status = ?, config = ?, results = ?, current_turn_number = ?,
                started_at = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(run.status.as_str())
        .bind(serde_json::to_string(&run.config)?)
        .bind(run.results.as_ref().map(serde_json::to_string).transpose()?)
        .bind(i64::from(run.current_turn_number))
        .bind(run.started_at.map(fmt_ts))
        .bind(run.completed_at.map(fmt_ts))
        .bind(run.id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(StoreError::not_found("scenario run", run.id));
        }
        Ok(())
    }

    async fn list_runs(
        &self,
        status: Option<ScenarioStatus>,
        limit: u32,
    ) -> Result<Vec<ScenarioRun>, StoreError> {
        let rows = match status {
            Some(st) => {
                sqlx::query(
                    "SELECT * FROM scenario_runs WHERE status = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(st.as_str())
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM scenario_runs ORDER BY created_at DESC LIMIT ?")
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(Self::row_to_run).collect()
    }

    async fn insert_agent(&self, agent: &AgentInstance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO agent_instances (
                id, template_id, scenario_run_id, instance_name,
                role_in_scenario, runtime_config, state, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(agent.id.to_string())
        .bind(agent.template_id.to_string())
        .bind(agent.scenario_run_id.to_string())
        .bind(&agent.instance_name)
        .bind(&agent.role_in_scenario)
        .bind(serde_json::to_string(&agent.runtime_config)?)
        .bind(serde_json::to_string(&agent.state)?)
        .bind(fmt_ts(agent.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_agent(&self, agent_id: Uuid) -> Result<AgentInstance, StoreError> {
        let row = sqlx::query("SELECT * FROM agent_instances WHERE id = ?")
            .bind(agent_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("agent instance", agent_id))?;
        Self::row_to_agent(&row)
    }

    async fn agents_for_run(&self, run_id: Uuid) -> Result<Vec<AgentInstance>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM agent_instances WHERE scenario_run_id = ? ORDER BY created_at ASC",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_agent).collect()
    }

    async fn update_agent_state(
        &self,
        agent_id: Uuid,
        state: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE agent_instances SET state = ? WHERE id = ?")
            .bind(serde_json::to_string(state)?)
            .bind(agent_id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::not_found("agent instance", agent_id));
        }
        Ok(())
    }
}
