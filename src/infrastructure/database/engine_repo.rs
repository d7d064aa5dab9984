//! SQLite implementation of the engine registry.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::domain::models::engine::{
    EngineInstance, EngineStatus, EngineType, Heartbeat,
};
use crate::domain::ports::engine_registry::EngineRegistry;
use crate::domain::ports::errors::StoreError;

use super::utils::{fmt_ts, parse_ts};

pub struct EngineRepository {
    pool: SqlitePool,
}

impl EngineRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_engine(row: &sqlx::sqlite::SqliteRow) -> Result<EngineInstance, StoreError> {
        let engine_type_str: String = row.get("engine_type");
        let engine_type = EngineType::parse_str(&engine_type_str)
            .ok_or_else(|| StoreError::Parse(format!("unknown engine type '{engine_type_str}'")))?;
        let status_str: String = row.get("status");
        let status = EngineStatus::parse_str(&status_str)
            .ok_or_else(|| StoreError::Parse(format!("unknown engine status '{status_str}'")))?;

        Ok(EngineInstance {
            id: row.get("id"),
            engine_type,
            status,
            capabilities: serde_json::from_str(row.get::<String, _>("capabilities").as_str())?,
            resource_limits: serde_json::from_str(
                row.get::<String, _>("resource_limits").as_str(),
            )?,
            metadata: match row.get::<Option<String>, _>("metadata") {
                Some(text) => Some(serde_json::from_str(&text)?),
                None => None,
            },
            current_workload: row.get::<i64, _>("current_workload") as u32,
            active_agents: row.get::<i64, _>("active_agents") as u32,
            processed_events_count: row.get::<i64, _>("processed_events_count") as u64,
            error_count: row.get::<i64, _>("error_count") as u64,
            last_error: row.get("last_error"),
            last_heartbeat: parse_ts(row.get::<String, _>("last_heartbeat").as_str())?,
            created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
        })
    }
}

#[async_trait]
impl EngineRegistry for EngineRepository {
    async fn insert(&self, engine: &EngineInstance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO engine_instances (
                id, engine_type, status, capabilities, resource_limits, metadata,
                current_workload, active_agents, processed_events_count, error_count,
                last_error, last_heartbeat, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&engine.id)
        .bind(engine.engine_type.as_str())
        .bind(engine.status.as_str())
        .bind(serde_json::to_string(&engine.capabilities)?)
        .bind(serde_json::to_string(&engine.resource_limits)?)
        .bind(
            engine
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(i64::from(engine.current_workload))
        .bind(i64::from(engine.active_agents))
        .bind(engine.processed_events_count as i64)
        .bind(engine.error_count as i64)
        .bind(&engine.last_error)
        .bind(fmt_ts(engine.last_heartbeat))
        .bind(fmt_ts(engine.created_at))
        .execute(&self.pool)
        .await?;
        debug!(engine_id = %engine.id, engine_type = %engine.engine_type, "registered engine");
        Ok(())
    }

    async fn get(&self, engine_id: &str) -> Result<EngineInstance, StoreError> {
        let row = sqlx::query("SELECT * FROM engine_instances WHERE id = ?")
            .bind(engine_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("engine", engine_id))?;
        Self::row_to_engine(&row)
    }

    async fn list(
        &self,
        engine_type: Option<EngineType>,
        status: Option<EngineStatus>,
    ) -> Result<Vec<EngineInstance>, StoreError> {
        let mut sql = String::from("SELECT * FROM engine_instances WHERE 1=1");
        if engine_type.is_some() {
            sql.push_str(" AND engine_type = ?");
        }
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY last_heartbeat DESC");

        let mut query = sqlx::query(&sql);
        if let Some(ty) = engine_type {
            query = query.bind(ty.as_str());
        }
        if let Some(st) = status {
            query = query.bind(st.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_engine).collect()
    }

    async fn heartbeat(
        &self,
        engine_id: &str,
        heartbeat: &Heartbeat,
    ) -> Result<EngineInstance, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE engine_instances
            SET status = ?, current_workload = ?, active_agents = ?,
                processed_events_count = ?, error_count = ?, last_error = ?,
                last_heartbeat = ?
            WHERE id = ?
            "#,
        )
        .bind(heartbeat.status.as_str())
        .bind(i64::from(heartbeat.current_workload))
        .bind(i64::from(heartbeat.active_agents))
        .bind(heartbeat.processed_events_count as i64)
        .bind(heartbeat.error_count as i64)
        .bind(&heartbeat.last_error)
        .bind(fmt_ts(Utc::now()))
        .bind(engine_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::not_found("engine", engine_id));
        }
        self.get(engine_id).await
    }

    async fn delete(&self, engine_id: &str) -> Result<(), StoreError> {
        let deleted = sqlx::query("DELETE FROM engine_instances WHERE id = ?")
            .bind(engine_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(StoreError::not_found("engine", engine_id));
        }
        debug!(engine_id, "deregistered engine");
        Ok(())
    }
}
