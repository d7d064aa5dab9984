//! Engine domain model.
//!
//! Engines are worker processes that lease events of their type from the
//! queue, run prompts against an LLM, and emit output events.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minutes without a heartbeat after which an engine counts as stale.
pub const STALE_HEARTBEAT_MINUTES: i64 = 5;

/// The kind of work an engine handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineType {
    /// In-character speech generation
    Actor,
    /// Scene and setting description
    Narrator,
    /// Observation analysis
    Analyst,
}

impl EngineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Actor => "actor",
            Self::Narrator => "narrator",
            Self::Analyst => "analyst",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "actor" => Some(Self::Actor),
            "narrator" => Some(Self::Narrator),
            "analyst" => Some(Self::Analyst),
            _ => None,
        }
    }

    /// Default output event type produced by engines of this type.
    pub fn output_event_type(&self) -> &'static str {
        match self {
            Self::Actor => "actor_speech_generated",
            Self::Narrator => "scene_description_generated",
            Self::Analyst => "analysis_checkpoint_generated",
        }
    }
}

impl std::fmt::Display for EngineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health status reported by an engine via heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self::Healthy
    }
}

impl EngineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "healthy" => Some(Self::Healthy),
            "degraded" => Some(Self::Degraded),
            "unhealthy" => Some(Self::Unhealthy),
            _ => None,
        }
    }

    /// Whether an engine in this status may lease events.
    pub fn can_process(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

/// Static capability declaration made at registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineCapabilities {
    /// Event-type names this engine knows how to process
    #[serde(default)]
    pub supported_event_types: Vec<String>,
    /// Maximum agents this engine can serve concurrently
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: u32,
    #[serde(default)]
    pub supports_streaming: bool,
    #[serde(default)]
    pub supports_memory_persistence: bool,
    /// Free-form capability tags
    #[serde(default)]
    pub custom_capabilities: Vec<String>,
}

fn default_max_concurrent_agents() -> u32 {
    1
}

impl EngineCapabilities {
    /// Check whether every requested capability is declared, either as a
    /// supported event type or a custom capability tag.
    pub fn covers(&self, required: &[String]) -> bool {
        required.iter().all(|cap| {
            self.supported_event_types.contains(cap) || self.custom_capabilities.contains(cap)
        })
    }
}

/// Resource limits declared at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum in-flight events; also the lease batch size
    #[serde(default = "default_max_concurrent_events")]
    pub max_concurrent_events: u32,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u32,
    #[serde(default = "default_cpu_limit_percent")]
    pub cpu_limit_percent: u32,
    #[serde(default = "default_max_processing_time_seconds")]
    pub max_processing_time_seconds: u32,
}

fn default_max_concurrent_events() -> u32 {
    1
}

fn default_memory_limit_mb() -> u32 {
    512
}

fn default_cpu_limit_percent() -> u32 {
    100
}

fn default_max_processing_time_seconds() -> u32 {
    300
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_concurrent_events: default_max_concurrent_events(),
            memory_limit_mb: default_memory_limit_mb(),
            cpu_limit_percent: default_cpu_limit_percent(),
            max_processing_time_seconds: default_max_processing_time_seconds(),
        }
    }
}

/// A registered engine worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInstance {
    /// Assigned id: `{engine_type}_{hint}_{8-hex}`
    pub id: String,
    pub engine_type: EngineType,
    pub status: EngineStatus,
    pub capabilities: EngineCapabilities,
    pub resource_limits: ResourceLimits,
    /// Free-form metadata supplied at registration
    pub metadata: Option<serde_json::Value>,
    /// In-flight event count reported by the last heartbeat
    pub current_workload: u32,
    pub active_agents: u32,
    pub processed_events_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl EngineInstance {
    /// Create a new engine record with a generated id.
    pub fn register(
        engine_type: EngineType,
        id_hint: &str,
        capabilities: EngineCapabilities,
        resource_limits: ResourceLimits,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let suffix = &unique[..8];
        let hint = if id_hint.is_empty() { "engine" } else { id_hint };
        let now = Utc::now();
        Self {
            id: format!("{}_{}_{}", engine_type.as_str(), hint, suffix),
            engine_type,
            status: EngineStatus::Healthy,
            capabilities,
            resource_limits,
            metadata,
            current_workload: 0,
            active_agents: 0,
            processed_events_count: 0,
            error_count: 0,
            last_error: None,
            last_heartbeat: now,
            created_at: now,
        }
    }

    /// Whether the last heartbeat is older than the staleness threshold.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.last_heartbeat > Duration::minutes(STALE_HEARTBEAT_MINUTES)
    }
}

/// Heartbeat payload sent by a worker each poll cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub status: EngineStatus,
    pub current_workload: u32,
    #[serde(default)]
    pub active_agents: u32,
    #[serde(default)]
    pub processed_events_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub resource_utilization: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_type_round_trip() {
        for ty in [EngineType::Actor, EngineType::Narrator, EngineType::Analyst] {
            assert_eq!(EngineType::parse_str(ty.as_str()), Some(ty));
        }
        assert_eq!(EngineType::parse_str("director"), None);
    }

    #[test]
    fn output_event_types() {
        assert_eq!(EngineType::Actor.output_event_type(), "actor_speech_generated");
        assert_eq!(EngineType::Narrator.output_event_type(), "scene_description_generated");
        assert_eq!(EngineType::Analyst.output_event_type(), "analysis_checkpoint_generated");
    }

    #[test]
    fn registration_assigns_prefixed_id() {
        let engine = EngineInstance::register(
            EngineType::Actor,
            "east",
            EngineCapabilities::default(),
            ResourceLimits::default(),
            None,
        );
        assert!(engine.id.starts_with("actor_east_"));
        assert_eq!(engine.status, EngineStatus::Healthy);
        assert_eq!(engine.current_workload, 0);
    }

    #[test]
    fn empty_hint_falls_back() {
        let engine = EngineInstance::register(
            EngineType::Narrator,
            "",
            EngineCapabilities::default(),
            ResourceLimits::default(),
            None,
        );
        assert!(engine.id.starts_with("narrator_engine_"));
    }

    #[test]
    fn staleness_threshold() {
        let mut engine = EngineInstance::register(
            EngineType::Analyst,
            "a",
            EngineCapabilities::default(),
            ResourceLimits::default(),
            None,
        );
        let now = Utc::now();
        assert!(!engine.is_stale(now));
        engine.last_heartbeat = now - Duration::minutes(STALE_HEARTBEAT_MINUTES + 1);
        assert!(engine.is_stale(now));
    }

    #[test]
    fn capability_coverage() {
        let caps = EngineCapabilities {
            supported_event_types: vec!["conversation_message".into()],
            custom_capabilities: vec!["memory".into()],
            ..Default::default()
        };
        assert!(caps.covers(&[]));
        assert!(caps.covers(&["conversation_message".to_string()]));
        assert!(caps.covers(&["memory".to_string()]));
        assert!(!caps.covers(&["streaming".to_string()]));
    }

    #[test]
    fn status_can_process() {
        assert!(EngineStatus::Healthy.can_process());
        assert!(EngineStatus::Degraded.can_process());
        assert!(!EngineStatus::Unhealthy.can_process());
    }
}
