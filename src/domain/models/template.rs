//! Agent and scenario template models.
//!
//! Templates are consumed, not owned: validation happens upstream, the
//! runtime reads them to materialize scenario runs and agent instances.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::engine::EngineType;
use super::flow::EventFlow;

/// Blueprint for the agent serving one role: engine type plus prompt and
/// LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTemplate {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub engine_type: EngineType,
    /// Character name, personality traits, narrative style, analytical focus
    #[serde(default)]
    pub personality_config: serde_json::Value,
    /// Model name, temperature, endpoint overrides
    #[serde(default)]
    pub llm_config: serde_json::Value,
    #[serde(default)]
    pub tools_config: serde_json::Value,
    /// Role-scoped defaults merged under runtime overrides
    #[serde(default)]
    pub runtime_overrides: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentTemplate {
    pub fn new(name: impl Into<String>, engine_type: EngineType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            engine_type,
            personality_config: serde_json::Value::Null,
            llm_config: serde_json::Value::Null,
            tools_config: serde_json::Value::Null,
            runtime_overrides: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_personality(mut self, config: serde_json::Value) -> Self {
        self.personality_config = config;
        self
    }

    pub fn with_llm_config(mut self, config: serde_json::Value) -> Self {
        self.llm_config = config;
        self
    }
}

/// One role slot declared by a scenario template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSpec {
    /// Agent template resolved by name at start
    pub template_name: String,
    pub engine_type: EngineType,
    /// A scenario cannot start unless every required role gets a live engine
    #[serde(default = "default_required")]
    pub required: bool,
    /// Role-level config merged over the agent template's defaults
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_required() -> bool {
    true
}

/// Interaction rules from the scenario config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractionRules {
    #[serde(default)]
    pub turn_based: bool,
}

/// Scenario-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Turn budget; 0 or absent means unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    /// Wall-clock budget enforced by the runner's monitor loop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub interaction_rules: InteractionRules,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_conditions: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<serde_json::Value>,
    #[serde(default)]
    pub initial_state: serde_json::Map<String, serde_json::Value>,
}

impl ScenarioConfig {
    /// Merge a runtime override on top of this config. Scalar fields are
    /// replaced when present in the override; initial_state merges per key.
    pub fn merged_with(&self, overrides: &ScenarioConfig) -> ScenarioConfig {
        let mut merged = self.clone();
        if overrides.max_turns.is_some() {
            merged.max_turns = overrides.max_turns;
        }
        if overrides.timeout_seconds.is_some() {
            merged.timeout_seconds = overrides.timeout_seconds;
        }
        if overrides.max_retries.is_some() {
            merged.max_retries = overrides.max_retries;
        }
        if overrides.interaction_rules.turn_based {
            merged.interaction_rules.turn_based = true;
        }
        if overrides.completion_conditions.is_some() {
            merged.completion_conditions = overrides.completion_conditions.clone();
        }
        if overrides.error_handling.is_some() {
            merged.error_handling = overrides.error_handling.clone();
        }
        for (key, value) in &overrides.initial_state {
            merged.initial_state.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// A scenario blueprint: config, role map, and event-flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioTemplate {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub config: ScenarioConfig,
    /// Role name to role spec, in declaration order
    pub agent_roles: IndexMap<String, RoleSpec>,
    pub event_flow: EventFlow,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScenarioTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            config: ScenarioConfig::default(),
            agent_roles: IndexMap::new(),
            event_flow: EventFlow::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Roles that must have a live engine before the scenario may run.
    pub fn required_roles(&self) -> impl Iterator<Item = (&String, &RoleSpec)> {
        self.agent_roles.iter().filter(|(_, spec)| spec.required)
    }
}
