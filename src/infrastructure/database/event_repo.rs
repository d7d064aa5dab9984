//! SQLite implementation of the leased event queue.
//!
//! Lease selection, the stale-lease sweep, and the lease stamps run inside a
//! single transaction so at most one engine ever holds an unexpired lease on
//! an event.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::engine::{EngineCapabilities, EngineType};
use crate::domain::models::event::{
    retry_delay_secs, EventInstance, EventStatus, EventTypeBinding, NewEvent, QueueCounts,
    LEASE_MINUTES,
};
use crate::domain::ports::errors::StoreError;
use crate::domain::ports::event_store::{EventStore, LeaseRequest};

use super::utils::{fmt_ts, parse_json, parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid};

pub struct EventRepository {
    pool: SqlitePool,
}

impl EventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<EventInstance, StoreError> {
        let status_str: String = row.get("status");
        let status = EventStatus::parse_str(&status_str)
            .ok_or_else(|| StoreError::Parse(format!("unknown event status '{status_str}'")))?;
        let processed: Vec<String> =
            serde_json::from_str(row.get::<String, _>("processed_by_engines").as_str())?;

        Ok(EventInstance {
            id: parse_uuid(row.get::<String, _>("id").as_str())?,
            scenario_run_id: parse_uuid(row.get::<String, _>("scenario_run_id").as_str())?,
            event_type: row.get("event_type"),
            source_agent_id: parse_opt_uuid(row.get("source_agent_id"))?,
            target_agent_id: parse_opt_uuid(row.get("target_agent_id"))?,
            payload: parse_json(row.get("payload"))?,
            priority: row.get("priority"),
            status,
            locked_by: row.get("locked_by"),
            lock_until: parse_opt_ts(row.get("lock_until"))?,
            retry_count: row.get::<i64, _>("retry_count") as u32,
            max_retries: row.get::<i64, _>("max_retries") as u32,
            last_error: row.get("last_error"),
            next_retry_time: parse_opt_ts(row.get("next_retry_time"))?,
            processed_by_engines: processed,
            result: match row.get::<Option<String>, _>("result") {
                Some(text) => Some(serde_json::from_str(&text)?),
                None => None,
            },
            created_at: parse_ts(row.get::<String, _>("created_at").as_str())?,
        })
    }

    async fn fetch_event(
        executor: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        event_id: Uuid,
    ) -> Result<EventInstance, StoreError> {
        let row = sqlx::query("SELECT * FROM event_instances WHERE id = ?")
            .bind(event_id.to_string())
            .fetch_optional(executor)
            .await?
            .ok_or_else(|| StoreError::not_found("event", event_id))?;
        Self::row_to_event(&row)
    }

    /// Infer an engine type for an unbound event type from the target
    /// agent's template. Returns None for untargeted events.
    async fn infer_engine_type(&self, target_agent_id: Option<Uuid>) -> Option<EngineType> {
        let target = target_agent_id?;
        let row = sqlx::query(
            r#"
            SELECT t.engine_type FROM agent_instances a
            JOIN agent_templates t ON t.id = a.template_id
            WHERE a.id = ?
            "#,
        )
        .bind(target.to_string())
        .fetch_optional(&self.pool)
        .await
        .ok()??;
        EngineType::parse_str(row.get::<String, _>("engine_type").as_str())
    }
}

#[async_trait]
impl EventStore for EventRepository {
    async fn enqueue(&self, event: NewEvent) -> Result<EventInstance, StoreError> {
        if event.event_type.trim().is_empty() {
            return Err(StoreError::Validation("event type cannot be empty".into()));
        }

        // Open vocabulary: bind unknown delivered types to the target
        // agent's engine type so the delivery is leaseable.
        if self.event_type_binding(&event.event_type).await?.is_none() {
            if let Some(engine_type) = self.infer_engine_type(event.target_agent_id).await {
                debug!(
                    event_type = %event.event_type,
                    engine_type = %engine_type,
                    "auto-registering event-type binding"
                );
                let mut binding = EventTypeBinding::new(event.event_type.clone(), engine_type);
                binding.category = Some("auto".into());
                self.register_event_type(binding).await?;
            } else {
                warn!(
                    event_type = %event.event_type,
                    "enqueueing event with no engine binding; it will not be leaseable until one is registered"
                );
            }
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        // A scheduled-after time lands in next_retry_time, which gates
        // visibility for queued events exactly like retry waits do.
        sqlx::query(
            r#"
            INSERT INTO event_instances (
                id, scenario_run_id, event_type, source_agent_id, target_agent_id,
                payload, priority, status, retry_count, max_retries,
                next_retry_time, processed_by_engines, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 'queued', 0, ?, ?, '[]', ?)
            "#,
        )
        .bind(id.to_string())
        .bind(event.scenario_run_id.to_string())
        .bind(&event.event_type)
        .bind(event.source_agent_id.map(|u| u.to_string()))
        .bind(event.target_agent_id.map(|u| u.to_string()))
        .bind(serde_json::to_string(&event.payload)?)
        .bind(event.priority)
        .bind(i64::from(event.max_retries))
        .bind(event.scheduled_after.map(fmt_ts))
        .bind(fmt_ts(now))
        .execute(&self.pool)
        .await?;

        self.get(id).await
    }

    async fn lease(&self, request: LeaseRequest) -> Result<Vec<EventInstance>, StoreError> {
        if request.max_events == 0 || request.max_events > 100 {
            return Err(StoreError::Validation(format!(
                "max_events must be within 1..=100, got {}",
                request.max_events
            )));
        }

        let now = Utc::now();
        let now_str = fmt_ts(now);
        let mut tx = self.pool.begin().await?;

        // Capability gate: the engine must exist and declare every required
        // capability, otherwise the lease yields nothing.
        let engine_row = sqlx::query("SELECT capabilities FROM engine_instances WHERE id = ?")
            .bind(&request.engine_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found("engine", &request.engine_id))?;
        if !request.required_capabilities.is_empty() {
            let capabilities: EngineCapabilities =
                serde_json::from_str(engine_row.get::<String, _>("capabilities").as_str())?;
            if !capabilities.covers(&request.required_capabilities) {
                tx.commit().await?;
                return Ok(Vec::new());
            }
        }

        // Stale-lease recovery: anything still marked processing past its
        // deadline goes back to the queue before selection.
        let swept = sqlx::query(
            r#"
            UPDATE event_instances
            SET status = 'queued', locked_by = NULL, lock_until = NULL
            WHERE status = 'processing' AND lock_until <= ?
            "#,
        )
        .bind(&now_str)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if swept > 0 {
            warn!(count = swept, "recovered events from expired leases");
        }

        let mut sql = String::from(
            r#"
            SELECT e.* FROM event_instances e
            JOIN event_types t ON t.name = e.event_type
            WHERE t.engine_type = ?
              AND e.status IN ('queued', 'retry')
              AND (e.next_retry_time IS NULL OR e.next_retry_time <= ?)
              AND (e.lock_until IS NULL OR e.lock_until < ?)
            "#,
        );
        if !request.event_type_filter.is_empty() {
            let placeholders = vec!["?"; request.event_type_filter.len()].join(", ");
            sql.push_str(&format!(" AND e.event_type IN ({placeholders})"));
        }
        if !request.priority_filter.is_empty() {
            let placeholders = vec!["?"; request.priority_filter.len()].join(", ");
            sql.push_str(&format!(" AND e.priority IN ({placeholders})"));
        }
        if request.target_agent_filter.is_some() {
            sql.push_str(" AND (e.target_agent_id = ? OR e.target_agent_id IS NULL)");
        }
        sql.push_str(" ORDER BY e.priority DESC, e.created_at ASC LIMIT ?");

        let mut query = sqlx::query(&sql)
            .bind(request.engine_type.as_str())
            .bind(&now_str)
            .bind(&now_str);
        for name in &request.event_type_filter {
            query = query.bind(name);
        }
        for priority in &request.priority_filter {
            query = query.bind(priority);
        }
        if let Some(agent_id) = request.target_agent_filter {
            query = query.bind(agent_id.to_string());
        }
        query = query.bind(i64::from(request.max_events));

        let rows = query.fetch_all(&mut *tx).await?;
        let lock_until = fmt_ts(now + Duration::minutes(LEASE_MINUTES));
        let mut leased = Vec::with_capacity(rows.len());

        for row in &rows {
            let mut event = Self::row_to_event(row)?;
            if !event.processed_by_engines.contains(&request.engine_id) {
                event.processed_by_engines.push(request.engine_id.clone());
            }
            sqlx::query(
                r#"
                UPDATE event_instances
                SET status = 'processing', locked_by = ?, lock_until = ?,
                    processed_by_engines = ?
                WHERE id = ?
                "#,
            )
            .bind(&request.engine_id)
            .bind(&lock_until)
            .bind(serde_json::to_string(&event.processed_by_engines)?)
            .bind(event.id.to_string())
            .execute(&mut *tx)
            .await?;

            event.status = EventStatus::Processing;
            event.locked_by = Some(request.engine_id.clone());
            event.lock_until = parse_ts(&lock_until).ok();
            leased.push(event);
        }

        tx.commit().await?;
        debug!(
            engine_id = %request.engine_id,
            engine_type = %request.engine_type,
            count = leased.len(),
            "leased events"
        );
        Ok(leased)
    }

    async fn complete(
        &self,
        event_id: Uuid,
        engine_id: &str,
        result: serde_json::Value,
    ) -> Result<EventInstance, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let event = Self::fetch_event(&mut *tx, event_id).await?;

        // Idempotent re-completion by a past lease holder changes nothing.
        if event.status == EventStatus::Completed
            && event.processed_by_engines.iter().any(|e| e == engine_id)
        {
            tx.commit().await?;
            return Ok(event);
        }

        if !event.leased_by(engine_id, now) {
            return Err(StoreError::LeaseMismatch {
                event_id: event_id.to_string(),
                engine_id: engine_id.to_string(),
            });
        }

        sqlx::query(
            r#"
            UPDATE event_instances
            SET status = 'completed', result = ?, locked_by = NULL,
                lock_until = NULL, retry_count = 0, next_retry_time = NULL
            WHERE id = ?
            "#,
        )
        .bind(serde_json::to_string(&result)?)
        .bind(event_id.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get(event_id).await
    }

    async fn fail(
        &self,
        event_id: Uuid,
        engine_id: &str,
        error: &str,
    ) -> Result<EventInstance, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let event = Self::fetch_event(&mut *tx, event_id).await?;

        if !event.leased_by(engine_id, now) {
            return Err(StoreError::LeaseMismatch {
                event_id: event_id.to_string(),
                engine_id: engine_id.to_string(),
            });
        }

        let new_count = event.retry_count + 1;
        if new_count >= event.max_retries {
            sqlx::query(
                r#"
                UPDATE event_instances
                SET status = 'failed', retry_count = ?, last_error = ?,
                    locked_by = NULL, lock_until = NULL, next_retry_time = NULL
                WHERE id = ?
                "#,
            )
            .bind(i64::from(new_count))
            .bind(error)
            .bind(event_id.to_string())
            .execute(&mut *tx)
            .await?;
            warn!(event_id = %event_id, retries = new_count, "event failed terminally");
        } else {
            // Delay doubles per completed attempt: 60s after the first
            // failure, then 120s, 240s, capped at an hour.
            let delay = retry_delay_secs(event.retry_count);
            let next_retry = now + Duration::seconds(delay as i64);
            sqlx::query(
                r#"
                UPDATE event_instances
                SET status = 'retry', retry_count = ?, last_error = ?,
                    locked_by = NULL, lock_until = NULL, next_retry_time = ?
                WHERE id = ?
                "#,
            )
            .bind(i64::from(new_count))
            .bind(error)
            .bind(fmt_ts(next_retry))
            .bind(event_id.to_string())
            .execute(&mut *tx)
            .await?;
            debug!(event_id = %event_id, retry = new_count, delay_secs = delay, "event scheduled for retry");
        }
        tx.commit().await?;

        self.get(event_id).await
    }

    async fn get(&self, event_id: Uuid) -> Result<EventInstance, StoreError> {
        Self::fetch_event(&self.pool, event_id).await
    }

    async fn list_for_scenario(
        &self,
        scenario_run_id: Uuid,
        limit: u32,
    ) -> Result<Vec<EventInstance>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM event_instances WHERE scenario_run_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(scenario_run_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_event).collect()
    }

    async fn release_engine_leases(&self, engine_id: &str) -> Result<u64, StoreError> {
        let released = sqlx::query(
            r#"
            UPDATE event_instances
            SET status = 'queued', locked_by = NULL, lock_until = NULL
            WHERE locked_by = ? AND status = 'processing'
            "#,
        )
        .bind(engine_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if released > 0 {
            debug!(engine_id, count = released, "released leases back to queue");
        }
        Ok(released)
    }

    async fn queue_counts(
        &self,
        scenario_run_id: Option<Uuid>,
    ) -> Result<QueueCounts, StoreError> {
        let rows = match scenario_run_id {
            Some(run_id) => {
                sqlx::query(
                    "SELECT status, COUNT(*) AS n FROM event_instances WHERE scenario_run_id = ? GROUP BY status",
                )
                .bind(run_id.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT status, COUNT(*) AS n FROM event_instances GROUP BY status")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut counts = QueueCounts::default();
        for row in rows {
            let n = row.get::<i64, _>("n") as u64;
            match EventStatus::parse_str(row.get::<String, _>("status").as_str()) {
                Some(EventStatus::Queued) => counts.queued = n,
                Some(EventStatus::Processing) => counts.processing = n,
                Some(EventStatus::Completed) => counts.completed = n,
                Some(EventStatus::Failed) => counts.failed = n,
                Some(EventStatus::Retry) => counts.retry = n,
                None => {}
            }
        }
        Ok(counts)
    }

    async fn register_event_type(&self, binding: EventTypeBinding) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO event_types (name, engine_type, category, description, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                engine_type = excluded.engine_type,
                category = excluded.category,
                description = excluded.description
            "#,
        )
        .bind(&binding.name)
        .bind(binding.engine_type.as_str())
        .bind(&binding.category)
        .bind(&binding.description)
        .bind(fmt_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn event_type_binding(
        &self,
        name: &str,
    ) -> Result<Option<EventTypeBinding>, StoreError> {
        let row = sqlx::query("SELECT * FROM event_types WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let engine_type_str: String = row.get("engine_type");
        let engine_type = EngineType::parse_str(&engine_type_str)
            .ok_or_else(|| StoreError::Parse(format!("unknown engine type '{engine_type_str}'")))?;
        Ok(Some(EventTypeBinding {
            name: row.get("name"),
            engine_type,
            category: row.get("category"),
            description: row.get("description"),
        }))
    }
}
