//! Engine worker loop.
//!
//! One worker serves one agent instance. The loop registers the engine,
//! then on each poll: leases a batch for its engine type, processes the
//! batch concurrently through the LLM adapter, reports completion or
//! failure per event, publishes outputs on the bus, and heartbeats.
//! Shutdown lets in-flight events finish up to a grace period, after which
//! unfinished work is recovered by lease expiry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::domain::models::config::WorkerConfig;
use crate::domain::models::engine::{
    EngineCapabilities, EngineInstance, EngineStatus, EngineType, Heartbeat, ResourceLimits,
};
use crate::domain::models::event::EventInstance;
use crate::domain::ports::engine_registry::EngineRegistry;
use crate::domain::ports::errors::StoreError;
use crate::domain::ports::event_store::{EventStore, LeaseRequest};
use crate::domain::ports::llm_client::{GenerateRequest, LlmClient};

use super::engines::{behavior_for, AgentProfile, EngineBehavior};
use super::event_bus::{EngineOutput, EventBus};

/// Default event types each engine type declares support for.
fn default_supported_event_types(behavior: &dyn EngineBehavior) -> Vec<String> {
    let common: &[&str] = match behavior.engine_type() {
        EngineType::Actor => {
            &["scenario_initialization", "conversation_message", "agent_message"]
        }
        EngineType::Narrator => {
            &["scenario_initialization", "request_scene_update", "narrative_event"]
        }
        EngineType::Analyst => {
            &["scenario_initialization", "analyze_checkpoint", "system_notification"]
        }
    };
    common.iter().map(|s| (*s).to_string()).collect()
}

/// Handle to a running worker task.
pub struct WorkerHandle {
    pub engine_id: String,
    pub agent_id: uuid::Uuid,
    shutdown_tx: broadcast::Sender<()>,
    join_handle: tokio::task::JoinHandle<()>,
    event_store: Arc<dyn EventStore>,
    registry: Arc<dyn EngineRegistry>,
    grace: Duration,
}

impl WorkerHandle {
    /// Stop the worker: signal shutdown, wait for in-flight events up to the
    /// grace period, then abort. Leases held past the abort are recovered by
    /// expiry; the engine row is removed either way.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let mut join_handle = self.join_handle;
        let graceful = tokio::time::timeout(self.grace, &mut join_handle).await;
        if graceful.is_err() {
            warn!(
                engine_id = %self.engine_id,
                "worker did not stop within grace period; aborting"
            );
            join_handle.abort();
        }

        // The worker deregisters itself on a clean exit; clean up here for
        // the aborted path and tolerate the already-gone case.
        if let Err(e) = self.event_store.release_engine_leases(&self.engine_id).await {
            warn!(engine_id = %self.engine_id, error = %e, "failed to release leases on stop");
        }
        match self.registry.delete(&self.engine_id).await {
            Ok(()) | Err(StoreError::NotFound { .. }) => {}
            Err(e) => warn!(engine_id = %self.engine_id, error = %e, "failed to deregister on stop"),
        }
    }
}

/// Spawns and runs one engine worker per agent.
pub struct EngineWorker {
    pub profile: AgentProfile,
    pub event_store: Arc<dyn EventStore>,
    pub registry: Arc<dyn EngineRegistry>,
    pub llm: Arc<dyn LlmClient>,
    pub bus: Arc<EventBus>,
    pub config: WorkerConfig,
}

impl EngineWorker {
    /// Register the engine and spawn its loop.
    pub async fn start(self) -> Result<WorkerHandle, StoreError> {
        let behavior: Arc<dyn EngineBehavior> = behavior_for(self.profile.engine_type).into();
        let capabilities = EngineCapabilities {
            supported_event_types: default_supported_event_types(behavior.as_ref()),
            max_concurrent_agents: 1,
            ..Default::default()
        };
        let engine = EngineInstance::register(
            self.profile.engine_type,
            &self.profile.role,
            capabilities,
            ResourceLimits::default(),
            Some(json!({
                "agent_instance_id": self.profile.agent_id,
                "scenario_run_id": self.profile.scenario_run_id,
            })),
        );
        self.registry.insert(&engine).await?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let engine_id = engine.id.clone();
        let agent_id = self.profile.agent_id;
        let event_store = Arc::clone(&self.event_store);
        let registry = Arc::clone(&self.registry);
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);

        let runner = WorkerLoop {
            engine_id: engine_id.clone(),
            max_in_flight: engine.resource_limits.max_concurrent_events.max(1),
            profile: self.profile,
            behavior,
            event_store: Arc::clone(&self.event_store),
            registry: Arc::clone(&self.registry),
            llm: self.llm,
            bus: self.bus,
            config: self.config,
        };
        let join_handle = tokio::spawn(runner.run(shutdown_rx));

        Ok(WorkerHandle {
            engine_id,
            agent_id,
            shutdown_tx,
            join_handle,
            event_store,
            registry,
            grace,
        })
    }
}

struct WorkerLoop {
    engine_id: String,
    max_in_flight: u32,
    profile: AgentProfile,
    behavior: Arc<dyn EngineBehavior>,
    event_store: Arc<dyn EventStore>,
    registry: Arc<dyn EngineRegistry>,
    llm: Arc<dyn LlmClient>,
    bus: Arc<EventBus>,
    config: WorkerConfig,
}

impl WorkerLoop {
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            engine_id = %self.engine_id,
            agent_id = %self.profile.agent_id,
            "worker loop started"
        );
        let mut poll = interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        let mut processed: u64 = 0;
        let mut errors: u64 = 0;
        let mut consecutive_errors: u64 = 0;

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    let request = LeaseRequest::new(
                        self.profile.engine_type,
                        self.engine_id.clone(),
                        self.max_in_flight,
                    )
                    .for_agent(self.profile.agent_id);

                    let leased = match self.event_store.lease(request).await {
                        Ok(events) => events,
                        Err(e) => {
                            error!(engine_id = %self.engine_id, error = %e, "lease failed");
                            errors += 1;
                            consecutive_errors += 1;
                            self.heartbeat(0, processed, errors, consecutive_errors, Some(e.to_string())).await;
                            continue;
                        }
                    };

                    if !leased.is_empty() {
                        self.heartbeat(leased.len() as u32, processed, errors, consecutive_errors, None).await;

                        let mut batch = JoinSet::new();
                        for event in leased {
                            let task = ProcessTask {
                                engine_id: self.engine_id.clone(),
                                profile: self.profile.clone(),
                                behavior: Arc::clone(&self.behavior),
                                event_store: Arc::clone(&self.event_store),
                                llm: Arc::clone(&self.llm),
                                bus: Arc::clone(&self.bus),
                            };
                            batch.spawn(async move { task.process(event).await });
                        }
                        while let Some(joined) = batch.join_next().await {
                            match joined {
                                Ok(Ok(())) => {
                                    processed += 1;
                                    consecutive_errors = 0;
                                }
                                Ok(Err(())) => {
                                    errors += 1;
                                    consecutive_errors += 1;
                                }
                                Err(e) => {
                                    error!(engine_id = %self.engine_id, error = %e, "processing task panicked");
                                    errors += 1;
                                    consecutive_errors += 1;
                                }
                            }
                        }
                    }

                    self.heartbeat(0, processed, errors, consecutive_errors, None).await;
                }
                _ = shutdown_rx.recv() => {
                    info!(engine_id = %self.engine_id, "worker received shutdown signal");
                    break;
                }
            }
        }

        // Clean exit: release anything still leased and deregister.
        if let Err(e) = self.event_store.release_engine_leases(&self.engine_id).await {
            warn!(engine_id = %self.engine_id, error = %e, "failed to release leases on shutdown");
        }
        match self.registry.delete(&self.engine_id).await {
            Ok(()) | Err(StoreError::NotFound { .. }) => {}
            Err(e) => {
                warn!(engine_id = %self.engine_id, error = %e, "failed to deregister on shutdown");
            }
        }
        info!(engine_id = %self.engine_id, "worker loop stopped");
    }

    async fn heartbeat(
        &self,
        workload: u32,
        processed: u64,
        errors: u64,
        consecutive_errors: u64,
        last_error: Option<String>,
    ) {
        let status = if consecutive_errors >= self.config.degrade_error_threshold {
            EngineStatus::Degraded
        } else {
            EngineStatus::Healthy
        };
        let heartbeat = Heartbeat {
            status,
            current_workload: workload,
            active_agents: 1,
            processed_events_count: processed,
            error_count: errors,
            resource_utilization: std::collections::HashMap::new(),
            last_error,
        };
        if let Err(e) = self.registry.heartbeat(&self.engine_id, &heartbeat).await {
            warn!(engine_id = %self.engine_id, error = %e, "heartbeat failed");
        }
    }
}

struct ProcessTask {
    engine_id: String,
    profile: AgentProfile,
    behavior: Arc<dyn EngineBehavior>,
    event_store: Arc<dyn EventStore>,
    llm: Arc<dyn LlmClient>,
    bus: Arc<EventBus>,
}

impl ProcessTask {
    /// Process one leased event end to end. Ok means the event completed;
    /// Err means it was reported failed (and will retry or fail terminally
    /// in the store).
    async fn process(self, event: EventInstance) -> Result<(), ()> {
        debug!(
            engine_id = %self.engine_id,
            event_id = %event.id,
            event_type = %event.event_type,
            "processing event"
        );

        let Some(prompt) = self.behavior.extract_prompt(&event.payload) else {
            self.report_failure(&event, "event payload carries no usable prompt")
                .await;
            return Err(());
        };

        let mut request = GenerateRequest::new(
            self.behavior.build_system_prompt(&self.profile),
            prompt,
        );
        request.model = self.profile.model_override();
        request.temperature = self.profile.temperature();

        match self.llm.generate(request).await {
            Ok(content) => {
                let output_type = self.behavior.output_event_type();
                let result = json!({
                    "event_type": output_type,
                    "content": content.clone(),
                    "agent_instance_id": self.profile.agent_id,
                });
                match self
                    .event_store
                    .complete(event.id, &self.engine_id, result)
                    .await
                {
                    Ok(_) => {
                        self.bus.publish(EngineOutput::new(
                            event.scenario_run_id,
                            self.profile.agent_id,
                            self.engine_id.clone(),
                            output_type,
                            json!({
                                "content": content,
                                "in_reply_to_event_type": event.event_type,
                            }),
                            event.id,
                        ));
                        Ok(())
                    }
                    Err(e) => {
                        // Lease may have expired mid-call; the sweep owns it now.
                        warn!(
                            engine_id = %self.engine_id,
                            event_id = %event.id,
                            error = %e,
                            "failed to record completion"
                        );
                        Err(())
                    }
                }
            }
            Err(e) => {
                self.report_failure(&event, &e.to_string()).await;
                Err(())
            }
        }
    }

    async fn report_failure(&self, event: &EventInstance, error: &str) {
        warn!(
            engine_id = %self.engine_id,
            event_id = %event.id,
            error,
            "event processing failed"
        );
        if let Err(e) = self.event_store.fail(event.id, &self.engine_id, error).await {
            warn!(
                engine_id = %self.engine_id,
                event_id = %event.id,
                error = %e,
                "failed to record failure"
            );
        }
    }
}
