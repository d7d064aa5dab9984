//! Scenario run and agent instance models.
//!
//! A scenario run is one execution of a scenario template; agent instances
//! are the per-role records bound to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::template::ScenarioConfig;

/// Lifecycle status of a scenario run.
///
/// Transitions are monotonic except for `Running ↔ Paused`; terminal
/// statuses never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Pending,
    Initializing,
    Running,
    Paused,
    Terminated,
    Completed,
    Failed,
}

impl Default for ScenarioStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ScenarioStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Terminated => "terminated",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "initializing" | "resuming" => Some(Self::Initializing),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "terminated" => Some(Self::Terminated),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated | Self::Completed | Self::Failed)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [ScenarioStatus] {
        match self {
            Self::Pending => &[Self::Initializing, Self::Failed, Self::Terminated],
            Self::Initializing => &[Self::Running, Self::Failed, Self::Terminated],
            Self::Running => &[
                Self::Paused,
                Self::Terminated,
                Self::Completed,
                Self::Failed,
            ],
            Self::Paused => &[Self::Initializing, Self::Running, Self::Terminated, Self::Failed],
            Self::Terminated | Self::Completed | Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of a scenario template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioRun {
    pub id: Uuid,
    pub template_id: Uuid,
    pub name: String,
    pub status: ScenarioStatus,
    /// Template config merged with the start-time runtime override
    pub config: ScenarioConfig,
    /// Results accumulate a `state_snapshot` sub-object and, on completion,
    /// final state and queue metrics
    pub results: Option<serde_json::Value>,
    pub current_turn_number: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScenarioRun {
    pub fn new(template_id: Uuid, name: impl Into<String>, config: ScenarioConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_id,
            name: name.into(),
            status: ScenarioStatus::Pending,
            config,
            results: None,
            current_turn_number: 0,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    /// Transition to a new status, enforcing the state machine.
    pub fn transition_to(&mut self, next: ScenarioStatus) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "cannot transition scenario from {} to {}",
                self.status.as_str(),
                next.as_str()
            ));
        }
        self.status = next;
        match next {
            ScenarioStatus::Running if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            ScenarioStatus::Terminated | ScenarioStatus::Completed | ScenarioStatus::Failed => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Per-role persistent record holding config and runtime state for the
/// engine serving that role. Lifecycle bound to its scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: Uuid,
    pub template_id: Uuid,
    pub scenario_run_id: Uuid,
    pub instance_name: String,
    pub role_in_scenario: String,
    /// Template config merged with role config and runtime overrides
    pub runtime_config: serde_json::Value,
    /// Key-value runtime state
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AgentInstance {
    pub fn new(
        template_id: Uuid,
        scenario_run_id: Uuid,
        instance_name: impl Into<String>,
        role_in_scenario: impl Into<String>,
        runtime_config: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_id,
            scenario_run_id,
            instance_name: instance_name.into(),
            role_in_scenario: role_in_scenario.into(),
            runtime_config,
            state: serde_json::Value::Object(serde_json::Map::new()),
            created_at: Utc::now(),
        }
    }
}
