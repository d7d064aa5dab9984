//! Domain models for the orchestration runtime.

pub mod config;
pub mod context;
pub mod engine;
pub mod event;
pub mod flow;
pub mod scenario;
pub mod template;

pub use config::Config;
pub use context::{ScenarioContext, StateSnapshot};
pub use engine::{
    EngineCapabilities, EngineInstance, EngineStatus, EngineType, Heartbeat, ResourceLimits,
};
pub use event::{
    retry_delay_secs, EventInstance, EventStatus, EventTypeBinding, NewEvent, QueueCounts,
};
pub use flow::{EventFlow, FlowRule, SourceSelector, TargetSelector};
pub use scenario::{AgentInstance, ScenarioRun, ScenarioStatus};
pub use template::{AgentTemplate, RoleSpec, ScenarioConfig, ScenarioTemplate};
