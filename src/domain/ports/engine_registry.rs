//! Engine registry port: durable record of each engine worker.

use async_trait::async_trait;
use serde::Serialize;

use super::errors::StoreError;
use crate::domain::models::engine::{EngineInstance, EngineStatus, EngineType, Heartbeat};

/// Aggregate health counts for the whole system.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemHealth {
    pub total_engines: u64,
    pub healthy_engines: u64,
    pub degraded_engines: u64,
    pub unhealthy_engines: u64,
    pub stale_engines: u64,
    pub queued_events: u64,
    pub processing_events: u64,
    pub failed_events: u64,
    /// healthy | degraded | critical
    pub system_health: String,
}

#[async_trait]
pub trait EngineRegistry: Send + Sync {
    /// Persist a freshly registered engine record.
    async fn insert(&self, engine: &EngineInstance) -> Result<(), StoreError>;

    async fn get(&self, engine_id: &str) -> Result<EngineInstance, StoreError>;

    async fn list(
        &self,
        engine_type: Option<EngineType>,
        status: Option<EngineStatus>,
    ) -> Result<Vec<EngineInstance>, StoreError>;

    /// Apply a heartbeat: status, workload, counters, last-error; stamps the
    /// heartbeat time. Only the registering engine updates its own row.
    async fn heartbeat(
        &self,
        engine_id: &str,
        heartbeat: &Heartbeat,
    ) -> Result<EngineInstance, StoreError>;

    /// Remove an engine. The caller is responsible for releasing its event
    /// leases first (see `EventStore::release_engine_leases`).
    async fn delete(&self, engine_id: &str) -> Result<(), StoreError>;
}
