//! Event domain model.
//!
//! Events are the unit of work routed between engines. Each event carries a
//! typed payload, a priority, and the lease/retry bookkeeping the queue
//! needs for at-most-one-worker processing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::engine::EngineType;

/// Lease duration granted to a worker on lease.
pub const LEASE_MINUTES: i64 = 5;

/// Default maximum processing attempts before an event fails terminally.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retry delay schedule: doubles per attempt, capped at one hour.
///
/// Kept as a pure function of the retry count so the schedule is trivially
/// testable and identical everywhere it is applied.
pub fn retry_delay_secs(retry_count: u32) -> u64 {
    let exp = retry_count.min(6); // 60 * 2^6 already exceeds the cap
    std::cmp::min(60u64 << exp, 3600)
}

/// Lifecycle status of an event in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Waiting to be leased
    Queued,
    /// Leased by an engine; lease deadline in the future
    Processing,
    /// Terminal success
    Completed,
    /// Terminal failure (retries exhausted)
    Failed,
    /// Failed attempt awaiting its next-retry time
    Retry,
}

impl Default for EventStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retry => "retry",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "retry" | "retrying" => Some(Self::Retry),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted event instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventInstance {
    pub id: Uuid,
    pub scenario_run_id: Uuid,
    /// Event-type name; bound to an engine type in the event-type registry
    pub event_type: String,
    /// Emitting agent; None for system-initiated events
    pub source_agent_id: Option<Uuid>,
    /// Targeted agent; None for broadcast
    pub target_agent_id: Option<Uuid>,
    pub payload: serde_json::Value,
    /// Higher wins; ties break on creation time
    pub priority: i64,
    pub status: EventStatus,
    pub locked_by: Option<String>,
    pub lock_until: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub next_retry_time: Option<DateTime<Utc>>,
    /// Every engine id that has held a lease on this event
    pub processed_by_engines: Vec<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for enqueueing a new event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub scenario_run_id: Uuid,
    pub event_type: String,
    pub source_agent_id: Option<Uuid>,
    pub target_agent_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub priority: i64,
    pub max_retries: u32,
    /// When set, the event is not leaseable before this time
    pub scheduled_after: Option<DateTime<Utc>>,
}

impl NewEvent {
    pub fn new(
        scenario_run_id: Uuid,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            scenario_run_id,
            event_type: event_type.into(),
            source_agent_id: None,
            target_agent_id: None,
            payload,
            priority: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            scheduled_after: None,
        }
    }

    pub fn with_source(mut self, agent_id: Uuid) -> Self {
        self.source_agent_id = Some(agent_id);
        self
    }

    pub fn with_target(mut self, agent_id: Uuid) -> Self {
        self.target_agent_id = Some(agent_id);
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_scheduled_after(mut self, not_before: DateTime<Utc>) -> Self {
        self.scheduled_after = Some(not_before);
        self
    }
}

impl EventInstance {
    /// Whether the queue may hand this event out right now.
    ///
    /// Visible means: `queued` past its scheduled-after time, or `retry`
    /// whose next-retry time has passed, and no unexpired lease.
    /// `next_retry_time` doubles as the not-before stamp for scheduled
    /// events.
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        let status_visible = match self.status {
            EventStatus::Queued | EventStatus::Retry => {
                self.next_retry_time.is_none_or(|t| t <= now)
            }
            _ => false,
        };
        let lease_free = self.lock_until.is_none_or(|until| until < now);
        status_visible && lease_free
    }

    /// Whether the given engine currently holds an unexpired lease.
    pub fn leased_by(&self, engine_id: &str, now: DateTime<Utc>) -> bool {
        self.locked_by.as_deref() == Some(engine_id)
            && self.lock_until.is_some_and(|until| until >= now)
    }

    /// Compute the lease deadline granted at `now`.
    pub fn lease_deadline(now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::minutes(LEASE_MINUTES)
    }
}

/// Binding from an event-type name to the engine type that processes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTypeBinding {
    pub name: String,
    pub engine_type: EngineType,
    pub category: Option<String>,
    pub description: Option<String>,
}

impl EventTypeBinding {
    pub fn new(name: impl Into<String>, engine_type: EngineType) -> Self {
        Self {
            name: name.into(),
            engine_type,
            category: None,
            description: None,
        }
    }
}

/// Per-status counts for a scenario's queue, used by monitor output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub retry: u64,
}

impl QueueCounts {
    pub fn total(&self) -> u64 {
        self.queued + self.processing + self.completed + self.failed + self.retry
    }
}
