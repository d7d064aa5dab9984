//! Engine Manager: the central coordinator.
//!
//! Owns the in-memory scenario contexts, starts one engine worker per agent
//! instance, subscribes to engine outputs, routes them through the flow
//! graph, and enqueues the resulting deliveries. Context mutation happens
//! under a per-scenario lock; no store write is issued while it is held.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde_json::json;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::models::config::WorkerConfig;
use crate::domain::models::context::{ScenarioContext, StateSnapshot};
use crate::domain::models::event::{EventInstance, NewEvent, DEFAULT_MAX_RETRIES};
use crate::domain::models::scenario::{AgentInstance, ScenarioRun};
use crate::domain::models::template::ScenarioTemplate;
use crate::domain::ports::engine_registry::EngineRegistry;
use crate::domain::ports::errors::StoreError;
use crate::domain::ports::event_store::EventStore;
use crate::domain::ports::llm_client::LlmClient;
use crate::domain::ports::scenario_store::ScenarioStore;

use super::engines::AgentProfile;
use super::event_bus::{EngineOutput, EventBus};
use super::router::{self, EmittedEvent};
use super::worker::{EngineWorker, WorkerHandle};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("scenario {0} is not registered")]
    NotRegistered(Uuid),

    #[error("required role '{role}' failed to start: {reason}")]
    RequiredRoleFailed { role: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

struct ScenarioEntry {
    context: Arc<Mutex<ScenarioContext>>,
    workers: Vec<WorkerHandle>,
    max_retries: u32,
}

pub struct EngineManager {
    event_store: Arc<dyn EventStore>,
    registry: Arc<dyn EngineRegistry>,
    scenario_store: Arc<dyn ScenarioStore>,
    llm: Arc<dyn LlmClient>,
    bus: Arc<EventBus>,
    worker_config: WorkerConfig,
    scenarios: RwLock<HashMap<Uuid, ScenarioEntry>>,
    shutdown_tx: broadcast::Sender<()>,
    /// Weak self-reference so background tasks can be spawned from `&self`
    /// without keeping the manager alive forever.
    self_ref: Weak<EngineManager>,
}

impl EngineManager {
    pub fn new(
        event_store: Arc<dyn EventStore>,
        registry: Arc<dyn EngineRegistry>,
        scenario_store: Arc<dyn ScenarioStore>,
        llm: Arc<dyn LlmClient>,
        bus: Arc<EventBus>,
        worker_config: WorkerConfig,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new_cyclic(|weak| Self {
            event_store,
            registry,
            scenario_store,
            llm,
            bus,
            worker_config,
            scenarios: RwLock::new(HashMap::new()),
            shutdown_tx,
            self_ref: weak.clone(),
        })
    }

    /// Spawn the single routing subscriber. Call once after construction.
    pub fn start_routing(&self) -> tokio::task::JoinHandle<()> {
        // Upgrading cannot fail while a live `&self` exists.
        let Some(manager) = self.self_ref.upgrade() else {
            return tokio::spawn(async {});
        };
        let mut rx = self.bus.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            info!("engine manager routing loop started");
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(output) => manager.handle_output(output).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "routing subscriber lagged; outputs dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
            info!("engine manager routing loop stopped");
        })
    }

    /// Register a scenario: build its context and start one worker per
    /// agent. Fails (and rolls back started workers) when a required role's
    /// worker cannot start; optional roles degrade to a warning.
    pub async fn register_scenario(
        &self,
        run: &ScenarioRun,
        template: &ScenarioTemplate,
        agents: &[AgentInstance],
    ) -> Result<(), ManagerError> {
        info!(
            scenario_run_id = %run.id,
            agents = agents.len(),
            "registering scenario"
        );
        let context = ScenarioContext::build(run.id, template, agents);
        let mut workers = Vec::with_capacity(agents.len());

        for agent in agents {
            let Some(spec) = template.agent_roles.get(&agent.role_in_scenario) else {
                warn!(
                    scenario_run_id = %run.id,
                    role = %agent.role_in_scenario,
                    "agent role not declared by template; skipping worker"
                );
                continue;
            };

            let profile = AgentProfile {
                agent_id: agent.id,
                scenario_run_id: run.id,
                role: agent.role_in_scenario.clone(),
                instance_name: agent.instance_name.clone(),
                engine_type: spec.engine_type,
                personality: agent
                    .runtime_config
                    .get("personality")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null),
                llm: agent
                    .runtime_config
                    .get("llm")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null),
            };

            let worker = EngineWorker {
                profile,
                event_store: Arc::clone(&self.event_store),
                registry: Arc::clone(&self.registry),
                llm: Arc::clone(&self.llm),
                bus: Arc::clone(&self.bus),
                config: self.worker_config.clone(),
            };

            match worker.start().await {
                Ok(handle) => {
                    debug!(
                        scenario_run_id = %run.id,
                        role = %agent.role_in_scenario,
                        engine_id = %handle.engine_id,
                        "started engine worker"
                    );
                    workers.push(handle);
                }
                Err(e) if spec.required => {
                    error!(
                        scenario_run_id = %run.id,
                        role = %agent.role_in_scenario,
                        error = %e,
                        "required role failed to start; rolling back"
                    );
                    for handle in workers {
                        handle.stop().await;
                    }
                    return Err(ManagerError::RequiredRoleFailed {
                        role: agent.role_in_scenario.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        scenario_run_id = %run.id,
                        role = %agent.role_in_scenario,
                        error = %e,
                        "optional role failed to start; continuing without it"
                    );
                }
            }
        }

        let entry = ScenarioEntry {
            context: Arc::new(Mutex::new(context)),
            workers,
            max_retries: run.config.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        };
        self.scenarios.write().await.insert(run.id, entry);
        Ok(())
    }

    /// Locate the scenario-start flow rule and enqueue its initial events.
    /// Returns the number of events enqueued; zero is not a failure (a
    /// scenario without an initialization rule starts quiet).
    pub async fn trigger_scenario_start(&self, run_id: Uuid) -> Result<usize, ManagerError> {
        let (deliveries, participant_roles) = {
            let scenarios = self.scenarios.read().await;
            let entry = scenarios
                .get(&run_id)
                .ok_or(ManagerError::NotRegistered(run_id))?;
            let ctx = entry.context.lock().await;
            let roles: HashMap<String, Uuid> = ctx.role_agents.clone();
            (router::scenario_start_deliveries(&ctx), roles)
        };

        if deliveries.is_empty() {
            debug!(scenario_run_id = %run_id, "no scenario-start rule; skipping initial event");
            return Ok(0);
        }

        let max_retries = self.max_retries_for(run_id).await?;
        let mut enqueued = 0;
        for delivery in deliveries {
            let payload = json!({
                "scenario_run_id": run_id,
                "scenario_context": format!("Scenario {run_id} has started"),
                "participant_roles": participant_roles,
                "prompt": "The scenario has begun. Set the scene and take your first action.",
            });
            self.event_store
                .enqueue(
                    NewEvent::new(run_id, delivery.event_type.clone(), payload)
                        .with_target(delivery.target_agent_id)
                        .with_priority(delivery.priority)
                        .with_max_retries(max_retries),
                )
                .await?;
            enqueued += 1;
        }
        info!(scenario_run_id = %run_id, count = enqueued, "scenario start events enqueued");
        Ok(enqueued)
    }

    /// Enqueue an externally supplied event into a registered scenario.
    pub async fn dispatch_event(
        &self,
        run_id: Uuid,
        event_type: &str,
        data: serde_json::Value,
        target_agent_id: Option<Uuid>,
    ) -> Result<EventInstance, ManagerError> {
        if !self.is_registered(run_id).await {
            return Err(ManagerError::NotRegistered(run_id));
        }
        let max_retries = self.max_retries_for(run_id).await?;
        let mut event = NewEvent::new(run_id, event_type, data).with_max_retries(max_retries);
        if let Some(target) = target_agent_id {
            event = event.with_target(target);
        }
        Ok(self.event_store.enqueue(event).await?)
    }

    /// Stop a scenario: cancel its workers and drop the context.
    pub async fn stop_scenario(&self, run_id: Uuid) {
        let entry = self.scenarios.write().await.remove(&run_id);
        let Some(entry) = entry else {
            warn!(scenario_run_id = %run_id, "stop requested for unregistered scenario");
            return;
        };
        info!(
            scenario_run_id = %run_id,
            workers = entry.workers.len(),
            "stopping scenario workers"
        );
        for handle in entry.workers {
            handle.stop().await;
        }
    }

    pub async fn is_registered(&self, run_id: Uuid) -> bool {
        self.scenarios.read().await.contains_key(&run_id)
    }

    pub async fn registered_scenarios(&self) -> Vec<Uuid> {
        self.scenarios.read().await.keys().copied().collect()
    }

    /// Copy of the scenario's resumable state plus turn bookkeeping.
    pub async fn context_snapshot(&self, run_id: Uuid) -> Option<StateSnapshot> {
        let scenarios = self.scenarios.read().await;
        let entry = scenarios.get(&run_id)?;
        let ctx = entry.context.lock().await;
        Some(ctx.snapshot())
    }

    /// Number of completed turns (length of the turn history).
    pub async fn turn_count(&self, run_id: Uuid) -> Option<u32> {
        let scenarios = self.scenarios.read().await;
        let entry = scenarios.get(&run_id)?;
        let ctx = entry.context.lock().await;
        Some(ctx.turn_history.len() as u32)
    }

    /// Restore a previously saved snapshot into the live context.
    pub async fn restore_context(
        &self,
        run_id: Uuid,
        snapshot: StateSnapshot,
    ) -> Result<(), ManagerError> {
        let scenarios = self.scenarios.read().await;
        let entry = scenarios
            .get(&run_id)
            .ok_or(ManagerError::NotRegistered(run_id))?;
        let mut ctx = entry.context.lock().await;
        ctx.restore(snapshot);
        Ok(())
    }

    /// Stop everything: all scenarios, then the routing loop.
    pub async fn shutdown(&self) {
        let run_ids: Vec<Uuid> = self.scenarios.read().await.keys().copied().collect();
        for run_id in run_ids {
            self.stop_scenario(run_id).await;
        }
        let _ = self.shutdown_tx.send(());
    }

    async fn max_retries_for(&self, run_id: Uuid) -> Result<u32, ManagerError> {
        let scenarios = self.scenarios.read().await;
        let entry = scenarios
            .get(&run_id)
            .ok_or(ManagerError::NotRegistered(run_id))?;
        Ok(entry.max_retries)
    }

    async fn handle_output(&self, output: EngineOutput) {
        let (deliveries, max_retries) = {
            let scenarios = self.scenarios.read().await;
            let Some(entry) = scenarios.get(&output.scenario_run_id) else {
                // Scenario stopped while the output was in flight.
                debug!(
                    scenario_run_id = %output.scenario_run_id,
                    "dropping output for unregistered scenario"
                );
                return;
            };

            let mut ctx = entry.context.lock().await;
            let emitted = EmittedEvent {
                source_agent_id: output.source_agent_id,
                event_type: output.event_type.clone(),
                payload: output.payload.clone(),
            };
            let deliveries = router::route(&emitted, &ctx);
            router::advance_turn_for(&mut ctx, output.source_agent_id);
            (deliveries, entry.max_retries)
        };

        for delivery in deliveries {
            let result = self
                .event_store
                .enqueue(
                    NewEvent::new(
                        output.scenario_run_id,
                        delivery.event_type.clone(),
                        delivery.payload.clone(),
                    )
                    .with_source(output.source_agent_id)
                    .with_target(delivery.target_agent_id)
                    .with_priority(delivery.priority)
                    .with_max_retries(max_retries),
                )
                .await;
            if let Err(e) = result {
                error!(
                    scenario_run_id = %output.scenario_run_id,
                    target = %delivery.target_agent_id,
                    error = %e,
                    "failed to enqueue routed delivery"
                );
            }
        }

        // Record the output on the producing agent's runtime state so a
        // resumed scenario can see where each agent left off.
        match self.scenario_store.get_agent(output.source_agent_id).await {
            Ok(mut agent) => {
                if let serde_json::Value::Object(state) = &mut agent.state {
                    state.insert("last_output_event_type".into(), json!(output.event_type));
                    state.insert("last_output_at".into(), json!(output.produced_at));
                } else {
                    agent.state = json!({
                        "last_output_event_type": output.event_type,
                        "last_output_at": output.produced_at,
                    });
                }
                if let Err(e) = self
                    .scenario_store
                    .update_agent_state(agent.id, &agent.state)
                    .await
                {
                    warn!(agent_id = %agent.id, error = %e, "failed to persist agent state");
                }
            }
            Err(e) => {
                debug!(
                    agent_id = %output.source_agent_id,
                    error = %e,
                    "no persisted agent instance for output source"
                );
            }
        }
    }
}
