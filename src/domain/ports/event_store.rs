//! Event store port: the leased queue shared between the coordinator and
//! engine workers.

use async_trait::async_trait;
use uuid::Uuid;

use super::errors::StoreError;
use crate::domain::models::engine::EngineType;
use crate::domain::models::event::{
    EventInstance, EventTypeBinding, NewEvent, QueueCounts,
};

/// Parameters for a lease request.
#[derive(Debug, Clone)]
pub struct LeaseRequest {
    pub engine_type: EngineType,
    pub engine_id: String,
    /// 1..=100
    pub max_events: u32,
    /// Capabilities the caller requires; an engine lacking any of them
    /// receives no events
    pub required_capabilities: Vec<String>,
    /// Restrict to these event-type names when non-empty
    pub event_type_filter: Vec<String>,
    /// Restrict to these priorities when non-empty
    pub priority_filter: Vec<i64>,
    /// When set, lease only events targeted at this agent or untargeted
    /// (broadcast) events. In-process workers serve exactly one agent.
    pub target_agent_filter: Option<Uuid>,
}

impl LeaseRequest {
    pub fn new(engine_type: EngineType, engine_id: impl Into<String>, max_events: u32) -> Self {
        Self {
            engine_type,
            engine_id: engine_id.into(),
            max_events,
            required_capabilities: Vec::new(),
            event_type_filter: Vec::new(),
            priority_filter: Vec::new(),
            target_agent_filter: None,
        }
    }

    pub fn for_agent(mut self, agent_id: Uuid) -> Self {
        self.target_agent_filter = Some(agent_id);
        self
    }
}

/// Durable record of every event instance with its lifecycle fields.
///
/// The store exclusively owns all persisted fields; engines mutate only
/// through the lease-checked `complete`/`fail` operations.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a `queued` event.
    async fn enqueue(&self, event: NewEvent) -> Result<EventInstance, StoreError>;

    /// Transactionally sweep expired leases, then select up to `max_events`
    /// visible events bound to the requested engine type, ordered by
    /// priority desc / created-at asc, stamping each with a 5-minute lease.
    async fn lease(&self, request: LeaseRequest) -> Result<Vec<EventInstance>, StoreError>;

    /// Mark an event completed. Requires the caller to hold the lease.
    /// Idempotent at the level of the result field.
    async fn complete(
        &self,
        event_id: Uuid,
        engine_id: &str,
        result: serde_json::Value,
    ) -> Result<EventInstance, StoreError>;

    /// Record a failed attempt. Requires the caller to hold the lease.
    /// Schedules a retry with exponential backoff, or fails terminally once
    /// the retry budget is exhausted.
    async fn fail(
        &self,
        event_id: Uuid,
        engine_id: &str,
        error: &str,
    ) -> Result<EventInstance, StoreError>;

    async fn get(&self, event_id: Uuid) -> Result<EventInstance, StoreError>;

    /// Events belonging to a scenario run, newest first.
    async fn list_for_scenario(
        &self,
        scenario_run_id: Uuid,
        limit: u32,
    ) -> Result<Vec<EventInstance>, StoreError>;

    /// Release every lease held by an engine back to `queued`. Used by
    /// deregistration. Returns the number of events released.
    async fn release_engine_leases(&self, engine_id: &str) -> Result<u64, StoreError>;

    /// Per-status counts, optionally scoped to one scenario.
    async fn queue_counts(
        &self,
        scenario_run_id: Option<Uuid>,
    ) -> Result<QueueCounts, StoreError>;

    /// Upsert an event-type -> engine-type binding.
    async fn register_event_type(&self, binding: EventTypeBinding) -> Result<(), StoreError>;

    /// Look up the binding for an event-type name.
    async fn event_type_binding(
        &self,
        name: &str,
    ) -> Result<Option<EventTypeBinding>, StoreError>;
}
