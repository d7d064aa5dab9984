//! In-memory per-scenario coordination record.
//!
//! The context is built when a scenario starts, mutated only under the
//! Engine Manager's per-scenario lock, discarded at stop, and reconstructible
//! from the stores plus a state snapshot for resume.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::engine::EngineType;
use super::flow::EventFlow;
use super::scenario::AgentInstance;
use super::template::ScenarioTemplate;

/// Coordination state for one running scenario.
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    pub scenario_run_id: Uuid,
    /// role name -> agent instance id
    pub role_agents: HashMap<String, Uuid>,
    /// agent instance id -> role name
    pub agent_roles: HashMap<Uuid, String>,
    /// Agent ids whose role engine type is actor, in role declaration order
    pub actor_agents: Vec<Uuid>,
    /// Copy of the template's flow graph
    pub event_flow: EventFlow,
    /// Agent whose turn it is; None when the scenario is untimed
    pub current_turn: Option<Uuid>,
    /// Ordered list of past turn holders
    pub turn_history: Vec<Uuid>,
    /// Merged initial state dictionary (mutable runtime state)
    pub state: serde_json::Map<String, serde_json::Value>,
    pub turn_based: bool,
}

impl ScenarioContext {
    /// Build the context from a template and its materialized agents.
    ///
    /// Actors are ordered by the template's role declaration order so
    /// round-robin turn rotation is deterministic. In a turn-based scenario
    /// the first actor holds the initial turn.
    pub fn build(
        scenario_run_id: Uuid,
        template: &ScenarioTemplate,
        agents: &[AgentInstance],
    ) -> Self {
        let mut role_agents = HashMap::new();
        let mut agent_roles = HashMap::new();
        let mut actor_agents = Vec::new();

        let by_role: HashMap<&str, &AgentInstance> = agents
            .iter()
            .map(|a| (a.role_in_scenario.as_str(), a))
            .collect();

        for (role, spec) in &template.agent_roles {
            let Some(agent) = by_role.get(role.as_str()) else {
                continue;
            };
            role_agents.insert(role.clone(), agent.id);
            agent_roles.insert(agent.id, role.clone());
            if spec.engine_type == EngineType::Actor {
                actor_agents.push(agent.id);
            }
        }

        let turn_based = template.config.interaction_rules.turn_based;
        let current_turn = if turn_based {
            actor_agents.first().copied()
        } else {
            None
        };

        Self {
            scenario_run_id,
            role_agents,
            agent_roles,
            actor_agents,
            event_flow: template.event_flow.clone(),
            current_turn,
            turn_history: Vec::new(),
            state: template.config.initial_state.clone(),
            turn_based,
        }
    }

    pub fn role_of(&self, agent_id: Uuid) -> Option<&str> {
        self.agent_roles.get(&agent_id).map(String::as_str)
    }

    pub fn agent_for_role(&self, role: &str) -> Option<Uuid> {
        self.role_agents.get(role).copied()
    }

    pub fn is_actor(&self, agent_id: Uuid) -> bool {
        self.actor_agents.contains(&agent_id)
    }

    /// Advance the turn pointer past `source`, round-robin over the actor
    /// list, and append `source` to the turn history.
    ///
    /// Callers check turn-based mode and actor-ness; non-actor output does
    /// not move the turn pointer.
    pub fn advance_turn(&mut self, source: Uuid) {
        if self.actor_agents.is_empty() {
            return;
        }
        let next = match self.actor_agents.iter().position(|&a| a == source) {
            Some(idx) => self.actor_agents[(idx + 1) % self.actor_agents.len()],
            // Source not in the actor list: hand the turn to the first actor
            None => self.actor_agents[0],
        };
        self.current_turn = Some(next);
        self.turn_history.push(source);
    }

    /// Serialize the resumable portion of this context.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            current_turn: self.current_turn,
            turn_history: self.turn_history.clone(),
            state: self.state.clone(),
        }
    }

    /// Restore turn tracking and runtime state from a snapshot.
    ///
    /// Role maps and the flow graph are rebuilt from the stores, so the
    /// snapshot carries only what those cannot reproduce.
    pub fn restore(&mut self, snapshot: StateSnapshot) {
        self.current_turn = snapshot.current_turn;
        self.turn_history = snapshot.turn_history;
        self.state = snapshot.state;
    }
}

/// Serialized copy of a scenario's in-memory state suitable for resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub current_turn: Option<Uuid>,
    #[serde(default)]
    pub turn_history: Vec<Uuid>,
    #[serde(default)]
    pub state: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::template::RoleSpec;

    fn template_with_roles(roles: &[(&str, EngineType)], turn_based: bool) -> ScenarioTemplate {
        let mut template = ScenarioTemplate::new("ctx_test");
        template.config.interaction_rules.turn_based = turn_based;
        for (role, engine_type) in roles {
            template.agent_roles.insert(
                (*role).to_string(),
                RoleSpec {
                    template_name: format!("{role}_template"),
                    engine_type: *engine_type,
                    required: true,
                    config: serde_json::Value::Null,
                },
            );
        }
        template
    }

    fn agents_for(template: &ScenarioTemplate, run_id: Uuid) -> Vec<AgentInstance> {
        template
            .agent_roles
            .keys()
            .map(|role| {
                AgentInstance::new(
                    Uuid::new_v4(),
                    run_id,
                    format!("{role}_instance"),
                    role.clone(),
                    serde_json::Value::Null,
                )
            })
            .collect()
    }

    #[test]
    fn build_maps_roles_and_actors() {
        let template = template_with_roles(
            &[
                ("primary", EngineType::Actor),
                ("narrator", EngineType::Narrator),
                ("secondary", EngineType::Actor),
            ],
            false,
        );
        let run_id = Uuid::new_v4();
        let agents = agents_for(&template, run_id);
        let ctx = ScenarioContext::build(run_id, &template, &agents);

        assert_eq!(ctx.role_agents.len(), 3);
        assert_eq!(ctx.actor_agents.len(), 2);
        assert_eq!(ctx.current_turn, None);
        let primary = ctx.agent_for_role("primary").unwrap();
        assert_eq!(ctx.role_of(primary), Some("primary"));
        assert!(ctx.is_actor(primary));
        let narrator = ctx.agent_for_role("narrator").unwrap();
        assert!(!ctx.is_actor(narrator));
    }

    #[test]
    fn turn_based_starts_with_first_actor() {
        let template = template_with_roles(
            &[
                ("primary", EngineType::Actor),
                ("secondary", EngineType::Actor),
            ],
            true,
        );
        let run_id = Uuid::new_v4();
        let agents = agents_for(&template, run_id);
        let ctx = ScenarioContext::build(run_id, &template, &agents);

        assert_eq!(ctx.current_turn, ctx.agent_for_role("primary"));
    }

    #[test]
    fn round_robin_turn_rotation() {
        let template = template_with_roles(
            &[
                ("primary", EngineType::Actor),
                ("secondary", EngineType::Actor),
            ],
            true,
        );
        let run_id = Uuid::new_v4();
        let agents = agents_for(&template, run_id);
        let mut ctx = ScenarioContext::build(run_id, &template, &agents);

        let primary = ctx.agent_for_role("primary").unwrap();
        let secondary = ctx.agent_for_role("secondary").unwrap();

        ctx.advance_turn(primary);
        assert_eq!(ctx.current_turn, Some(secondary));
        ctx.advance_turn(secondary);
        assert_eq!(ctx.current_turn, Some(primary));
        assert_eq!(ctx.turn_history, vec![primary, secondary]);
    }

    #[test]
    fn snapshot_round_trip() {
        let template = template_with_roles(
            &[
                ("primary", EngineType::Actor),
                ("secondary", EngineType::Actor),
            ],
            true,
        );
        let run_id = Uuid::new_v4();
        let agents = agents_for(&template, run_id);
        let mut ctx = ScenarioContext::build(run_id, &template, &agents);
        let primary = ctx.agent_for_role("primary").unwrap();
        ctx.advance_turn(primary);
        ctx.state
            .insert("scene".into(), serde_json::json!("tavern"));

        let snapshot = ctx.snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();
        let parsed: StateSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, snapshot);

        let mut restored = ScenarioContext::build(run_id, &template, &agents);
        restored.restore(parsed);
        assert_eq!(restored.current_turn, ctx.current_turn);
        assert_eq!(restored.turn_history, ctx.turn_history);
        assert_eq!(restored.state["scene"], "tavern");
    }
}
