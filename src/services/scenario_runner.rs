//! Scenario Runner: lifecycle orchestrator and external entry point.
//!
//! Start materializes a run and its agents from a template, registers them
//! with the Engine Manager, emits the scenario-start event, and arms a
//! monitor loop enforcing the timeout and turn budgets. Stop snapshots and
//! terminates; resume rebuilds the context from the stores and the saved
//! snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::models::config::QueueConfig;
use crate::domain::models::context::StateSnapshot;
use crate::domain::models::event::QueueCounts;
use crate::domain::models::scenario::{AgentInstance, ScenarioRun, ScenarioStatus};
use crate::domain::models::template::{ScenarioConfig, ScenarioTemplate};
use crate::domain::ports::errors::StoreError;
use crate::domain::ports::event_store::EventStore;
use crate::domain::ports::scenario_store::ScenarioStore;
use crate::domain::ports::template_store::TemplateStore;

use super::engine_manager::{EngineManager, ManagerError};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("scenario template '{0}' not found")]
    TemplateNotFound(String),

    #[error("agent template '{0}' not found")]
    AgentTemplateNotFound(String),

    #[error("scenario run {0} not found")]
    RunNotFound(Uuid),

    #[error("agent instance {0} not found in scenario")]
    AgentNotFound(Uuid),

    #[error("scenario {id} is {status}; cannot {action}")]
    InvalidState {
        id: Uuid,
        status: &'static str,
        action: &'static str,
    },

    #[error("state snapshot is corrupted: {0}")]
    CorruptSnapshot(String),

    #[error("invalid status transition: {0}")]
    Transition(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Monitor output for one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub id: Uuid,
    pub name: String,
    pub status: ScenarioStatus,
    pub is_active: bool,
    pub current_turn_number: u32,
    pub started_at: Option<chrono::DateTime<Utc>>,
    pub completed_at: Option<chrono::DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<StateSnapshot>,
    pub event_stats: QueueCounts,
}

/// One step of a scripted event sequence.
#[derive(Debug, Clone, Deserialize)]
pub struct SequenceEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub target_agent_id: Option<Uuid>,
    #[serde(default)]
    pub delay_seconds: u64,
}

pub struct ScenarioRunner {
    scenario_store: Arc<dyn ScenarioStore>,
    template_store: Arc<dyn TemplateStore>,
    event_store: Arc<dyn EventStore>,
    manager: Arc<EngineManager>,
    queue_config: QueueConfig,
    monitors: Mutex<HashMap<Uuid, tokio::task::JoinHandle<()>>>,
    /// Weak self-reference for spawning monitor loops from `&self`.
    self_ref: Weak<ScenarioRunner>,
}

impl ScenarioRunner {
    pub fn new(
        scenario_store: Arc<dyn ScenarioStore>,
        template_store: Arc<dyn TemplateStore>,
        event_store: Arc<dyn EventStore>,
        manager: Arc<EngineManager>,
        queue_config: QueueConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            scenario_store,
            template_store,
            event_store,
            manager,
            queue_config,
            monitors: Mutex::new(HashMap::new()),
            self_ref: weak.clone(),
        })
    }

    /// Start a new scenario from a template.
    ///
    /// Advances the run pending → initializing → running, materializing one
    /// agent instance per declared role on the way.
    pub async fn start_scenario(
        &self,
        template_name: &str,
        scenario_config: Option<ScenarioConfig>,
        agent_configs: Option<HashMap<String, Value>>,
    ) -> Result<Uuid, ScenarioError> {
        let template = self
            .template_store
            .scenario_template_by_name(template_name)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => {
                    ScenarioError::TemplateNotFound(template_name.to_string())
                }
                other => ScenarioError::Store(other),
            })?;

        let mut merged_config = template.config.clone();
        if let Some(overrides) = &scenario_config {
            merged_config = merged_config.merged_with(overrides);
        }
        if merged_config.max_retries.is_none() {
            merged_config.max_retries = Some(self.queue_config.max_retries);
        }

        let run_name = format!("{}_run_{}", template_name, Utc::now().timestamp_millis());
        let mut run = ScenarioRun::new(template.id, run_name, merged_config.clone());
        self.scenario_store.insert_run(&run).await?;
        info!(scenario_run_id = %run.id, template = template_name, "starting scenario");

        run.transition_to(ScenarioStatus::Initializing)
            .map_err(ScenarioError::Transition)?;
        self.scenario_store.update_run(&run).await?;

        let agents = match self.materialize_agents(&run, &template, agent_configs).await {
            Ok(agents) => agents,
            Err(e) => {
                self.mark_failed(&mut run, &e.to_string()).await;
                return Err(e);
            }
        };

        // The manager sees the template with the merged config so turn
        // rules and initial state reflect runtime overrides.
        let mut context_template = template.clone();
        context_template.config = merged_config;

        if let Err(e) = self
            .manager
            .register_scenario(&run, &context_template, &agents)
            .await
        {
            self.mark_failed(&mut run, &e.to_string()).await;
            return Err(e.into());
        }

        if let Err(e) = self.manager.trigger_scenario_start(run.id).await {
            self.manager.stop_scenario(run.id).await;
            self.mark_failed(&mut run, &e.to_string()).await;
            return Err(e.into());
        }

        run.transition_to(ScenarioStatus::Running)
            .map_err(ScenarioError::Transition)?;
        self.scenario_store.update_run(&run).await?;
        self.spawn_monitor(run.id).await;

        info!(scenario_run_id = %run.id, "scenario running");
        Ok(run.id)
    }

    /// Enqueue an external event into a running scenario.
    pub async fn send_event_to_scenario(
        &self,
        run_id: Uuid,
        event_type: &str,
        data: Value,
        target_agent_id: Option<Uuid>,
    ) -> Result<Value, ScenarioError> {
        let run = self.load_run(run_id).await?;
        if run.status != ScenarioStatus::Running {
            return Err(ScenarioError::InvalidState {
                id: run_id,
                status: run.status.as_str(),
                action: "receive events",
            });
        }
        if let Some(target) = target_agent_id {
            let agent = self
                .scenario_store
                .get_agent(target)
                .await
                .map_err(|e| match e {
                    StoreError::NotFound { .. } => ScenarioError::AgentNotFound(target),
                    other => ScenarioError::Store(other),
                })?;
            if agent.scenario_run_id != run_id {
                return Err(ScenarioError::AgentNotFound(target));
            }
        }
        let event = self
            .manager
            .dispatch_event(run_id, event_type, data, target_agent_id)
            .await?;
        Ok(json!({
            "success": true,
            "scenario_run_id": run_id,
            "event_id": event.id,
            "event_type": event.event_type,
        }))
    }

    /// Dispatch an ordered sequence of events with optional delays.
    pub async fn run_scenario_sequence(
        &self,
        run_id: Uuid,
        sequence: Vec<SequenceEvent>,
    ) -> Result<Vec<Value>, ScenarioError> {
        let mut results = Vec::with_capacity(sequence.len());
        for (i, step) in sequence.into_iter().enumerate() {
            debug!(scenario_run_id = %run_id, step = i, event_type = %step.event_type, "sequence step");
            let result = self
                .send_event_to_scenario(run_id, &step.event_type, step.data, step.target_agent_id)
                .await?;
            results.push(result);
            if step.delay_seconds > 0 {
                tokio::time::sleep(Duration::from_secs(step.delay_seconds)).await;
            }
        }
        Ok(results)
    }

    /// Current status, state, and queue counts for a scenario.
    pub async fn monitor_scenario(&self, run_id: Uuid) -> Result<MonitorReport, ScenarioError> {
        let run = self.load_run(run_id).await?;
        let state = self.manager.context_snapshot(run_id).await;
        let is_active = state.is_some();
        let event_stats = self.event_store.queue_counts(Some(run_id)).await?;
        let current_turn_number = self
            .manager
            .turn_count(run_id)
            .await
            .unwrap_or(run.current_turn_number);

        Ok(MonitorReport {
            id: run.id,
            name: run.name,
            status: run.status,
            is_active,
            current_turn_number,
            started_at: run.started_at,
            completed_at: run.completed_at,
            state,
            event_stats,
        })
    }

    /// Persist the in-memory state under `results.state_snapshot`.
    pub async fn save_state_snapshot(&self, run_id: Uuid) -> Result<(), ScenarioError> {
        let Some(snapshot) = self.manager.context_snapshot(run_id).await else {
            return Err(ScenarioError::InvalidState {
                id: run_id,
                status: "inactive",
                action: "snapshot",
            });
        };
        let mut run = self.load_run(run_id).await?;

        let mut results = match run.results.take() {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        results.insert("state_snapshot".into(), serde_json::to_value(&snapshot)?);
        results.insert(
            "last_snapshot_time".into(),
            json!(Utc::now().to_rfc3339()),
        );
        run.results = Some(Value::Object(results));
        run.current_turn_number = snapshot.turn_history.len() as u32;
        self.scenario_store.update_run(&run).await?;
        info!(scenario_run_id = %run_id, "state snapshot saved");
        Ok(())
    }

    /// Snapshot, then terminate with the given reason.
    pub async fn stop_scenario(&self, run_id: Uuid, reason: &str) -> Result<(), ScenarioError> {
        info!(scenario_run_id = %run_id, reason, "stopping scenario");
        if let Err(e) = self.save_state_snapshot(run_id).await {
            warn!(scenario_run_id = %run_id, error = %e, "snapshot before stop failed");
        }
        self.complete_scenario(
            run_id,
            ScenarioStatus::Terminated,
            json!({ "termination_reason": reason }),
        )
        .await
    }

    /// Write final results, transition to a terminal status, and clean up.
    pub async fn complete_scenario(
        &self,
        run_id: Uuid,
        status: ScenarioStatus,
        extra_results: Value,
    ) -> Result<(), ScenarioError> {
        if !status.is_terminal() {
            return Err(ScenarioError::Transition(format!(
                "completion status must be terminal, got {status}"
            )));
        }
        let mut run = self.load_run(run_id).await?;
        if run.is_terminal() {
            return Err(ScenarioError::InvalidState {
                id: run_id,
                status: run.status.as_str(),
                action: "complete",
            });
        }

        // Final state and queue metrics fold into results alongside any
        // previously saved snapshot.
        let final_snapshot = self.manager.context_snapshot(run_id).await;
        let event_stats = self.event_store.queue_counts(Some(run_id)).await?;

        let mut results = match run.results.take() {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        if let Some(snapshot) = &final_snapshot {
            results.insert("final_state".into(), serde_json::to_value(snapshot)?);
            run.current_turn_number = snapshot.turn_history.len() as u32;
        }
        results.insert("event_stats".into(), serde_json::to_value(&event_stats)?);
        if let Value::Object(extra) = extra_results {
            for (key, value) in extra {
                results.insert(key, value);
            }
        }
        run.results = Some(Value::Object(results));

        run.transition_to(status).map_err(ScenarioError::Transition)?;
        self.scenario_store.update_run(&run).await?;

        self.manager.stop_scenario(run_id).await;
        if let Some(monitor) = self.monitors.lock().await.remove(&run_id) {
            monitor.abort();
        }
        info!(scenario_run_id = %run_id, status = %status, "scenario completed");
        Ok(())
    }

    /// Resume a paused or interrupted scenario from its stored snapshot.
    pub async fn resume_scenario(&self, run_id: Uuid) -> Result<(), ScenarioError> {
        let mut run = self.load_run(run_id).await?;
        if run.is_terminal() {
            return Err(ScenarioError::InvalidState {
                id: run_id,
                status: run.status.as_str(),
                action: "resume",
            });
        }
        if self.manager.is_registered(run_id).await {
            return Err(ScenarioError::InvalidState {
                id: run_id,
                status: "active",
                action: "resume",
            });
        }
        if !matches!(run.status, ScenarioStatus::Paused | ScenarioStatus::Running) {
            return Err(ScenarioError::InvalidState {
                id: run_id,
                status: run.status.as_str(),
                action: "resume",
            });
        }

        // Validate the snapshot before touching anything: a corrupt
        // snapshot refuses to resume.
        let snapshot = match run
            .results
            .as_ref()
            .and_then(|r| r.get("state_snapshot"))
        {
            Some(raw) => Some(
                serde_json::from_value::<StateSnapshot>(raw.clone())
                    .map_err(|e| ScenarioError::CorruptSnapshot(e.to_string()))?,
            ),
            None => None,
        };

        let agents = self.scenario_store.agents_for_run(run_id).await?;
        let mut template = self
            .template_store
            .scenario_template_by_id(run.template_id)
            .await?;
        template.config = run.config.clone();

        info!(scenario_run_id = %run_id, agents = agents.len(), "resuming scenario");
        if let Err(e) = self.manager.register_scenario(&run, &template, &agents).await {
            self.mark_failed(&mut run, &e.to_string()).await;
            return Err(e.into());
        }

        if let Some(snapshot) = snapshot {
            self.manager.restore_context(run_id, snapshot).await?;
        }

        if run.status == ScenarioStatus::Paused {
            run.transition_to(ScenarioStatus::Running)
                .map_err(ScenarioError::Transition)?;
            self.scenario_store.update_run(&run).await?;
        }
        self.spawn_monitor(run_id).await;
        info!(scenario_run_id = %run_id, "scenario resumed");
        Ok(())
    }

    /// Running scenarios, newest first.
    pub async fn list_active(&self) -> Result<Vec<ScenarioRun>, ScenarioError> {
        Ok(self
            .scenario_store
            .list_runs(Some(ScenarioStatus::Running), 100)
            .await?)
    }

    /// Stop every active scenario and release resources.
    pub async fn shutdown(&self) {
        let active = self.manager.registered_scenarios().await;
        for run_id in active {
            if let Err(e) = self.stop_scenario(run_id, "coordinator_shutdown").await {
                warn!(scenario_run_id = %run_id, error = %e, "failed to stop scenario on shutdown");
            }
        }
        self.manager.shutdown().await;
    }

    async fn load_run(&self, run_id: Uuid) -> Result<ScenarioRun, ScenarioError> {
        self.scenario_store.get_run(run_id).await.map_err(|e| match e {
            StoreError::NotFound { .. } => ScenarioError::RunNotFound(run_id),
            other => ScenarioError::Store(other),
        })
    }

    async fn mark_failed(&self, run: &mut ScenarioRun, reason: &str) {
        error!(scenario_run_id = %run.id, reason, "scenario failed");
        let mut results = match run.results.take() {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        results.insert("failure_reason".into(), json!(reason));
        run.results = Some(Value::Object(results));
        if run.transition_to(ScenarioStatus::Failed).is_ok() {
            if let Err(e) = self.scenario_store.update_run(run).await {
                error!(scenario_run_id = %run.id, error = %e, "failed to persist failure");
            }
        }
    }

    /// Materialize one agent instance per declared role.
    ///
    /// Config merge order, lowest to highest: agent template defaults,
    /// template runtime overrides, role config, caller per-role config.
    async fn materialize_agents(
        &self,
        run: &ScenarioRun,
        template: &ScenarioTemplate,
        agent_configs: Option<HashMap<String, Value>>,
    ) -> Result<Vec<AgentInstance>, ScenarioError> {
        let mut agents = Vec::with_capacity(template.agent_roles.len());
        for (role, spec) in &template.agent_roles {
            let agent_template = self
                .template_store
                .agent_template_by_name(&spec.template_name)
                .await
                .map_err(|e| match e {
                    StoreError::NotFound { .. } => {
                        ScenarioError::AgentTemplateNotFound(spec.template_name.clone())
                    }
                    other => ScenarioError::Store(other),
                })?;

            let mut runtime_config = json!({
                "personality": agent_template.personality_config,
                "llm": agent_template.llm_config,
                "tools": agent_template.tools_config,
            });
            merge_json(&mut runtime_config, &agent_template.runtime_overrides);
            merge_json(&mut runtime_config, &spec.config);
            if let Some(configs) = &agent_configs {
                if let Some(role_override) = configs.get(role) {
                    merge_json(&mut runtime_config, role_override);
                }
            }

            let agent = AgentInstance::new(
                agent_template.id,
                run.id,
                format!("{}_{}", role, agent_template.name),
                role.clone(),
                runtime_config,
            );
            self.scenario_store.insert_agent(&agent).await?;
            debug!(
                scenario_run_id = %run.id,
                agent_id = %agent.id,
                role = %role,
                "materialized agent instance"
            );
            agents.push(agent);
        }
        Ok(agents)
    }

    /// Arm the monitor loop enforcing timeout and turn budgets.
    async fn spawn_monitor(&self, run_id: Uuid) {
        // Upgrading cannot fail while a live `&self` exists.
        let Some(runner) = self.self_ref.upgrade() else {
            return;
        };
        let period = Duration::from_secs(self.queue_config.monitor_interval_secs.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                if !runner.manager.is_registered(run_id).await {
                    break;
                }
                let run = match runner.load_run(run_id).await {
                    Ok(run) => run,
                    Err(e) => {
                        warn!(scenario_run_id = %run_id, error = %e, "monitor failed to load run");
                        break;
                    }
                };
                if run.is_terminal() {
                    break;
                }

                if let (Some(timeout), Some(started_at)) =
                    (run.config.timeout_seconds, run.started_at)
                {
                    let elapsed = (Utc::now() - started_at).num_seconds();
                    if elapsed >= 0 && elapsed as u64 >= timeout {
                        warn!(scenario_run_id = %run_id, elapsed, "scenario timed out");
                        if let Err(e) = runner.stop_scenario(run_id, "timeout").await {
                            error!(scenario_run_id = %run_id, error = %e, "timeout stop failed");
                        }
                        break;
                    }
                }

                if let Some(max_turns) = run.config.max_turns.filter(|&t| t > 0) {
                    let turns = runner.manager.turn_count(run_id).await.unwrap_or(0);
                    if turns >= max_turns {
                        info!(scenario_run_id = %run_id, turns, "turn budget exhausted");
                        if let Err(e) =
                            runner.stop_scenario(run_id, "max_turns_reached").await
                        {
                            error!(scenario_run_id = %run_id, error = %e, "max-turns stop failed");
                        }
                        break;
                    }
                }
            }
        });
        if let Some(previous) = self.monitors.lock().await.insert(run_id, handle) {
            previous.abort();
        }
    }
}

/// Deep-merge `overlay` into `base`. Objects merge per key; everything else
/// replaces. Null overlays are ignored.
fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}
