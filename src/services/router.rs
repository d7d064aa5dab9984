//! Event router: pure rewriting of emitted events over the flow graph.
//!
//! Given an emitted event and a scenario context, the router scans flow
//! rules in declaration order, takes the first match, resolves the target
//! selector against the live role/actor maps, and produces one delivered
//! event per target with an enriched payload. Turn advancement is a separate
//! context mutation applied by the Engine Manager under the scenario lock.

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::context::ScenarioContext;
use crate::domain::models::flow::{SourceSelector, TargetSelector};

/// An event as emitted by an engine, before routing.
#[derive(Debug, Clone)]
pub struct EmittedEvent {
    pub source_agent_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// One delivery produced by the router.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub target_agent_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub priority: i64,
}

/// Route an emitted event through the scenario's flow graph.
///
/// Returns an empty vec when no rule matches (a valid no-op) or when the
/// matching rule targets `system`. Returns an empty vec with a warning when
/// the source agent has no role in the scenario.
pub fn route(event: &EmittedEvent, ctx: &ScenarioContext) -> Vec<Delivery> {
    let Some(source_role) = ctx.role_of(event.source_agent_id) else {
        warn!(
            scenario_run_id = %ctx.scenario_run_id,
            agent_id = %event.source_agent_id,
            "source agent has no role in scenario; dropping event"
        );
        return Vec::new();
    };
    let source_is_actor = ctx.is_actor(event.source_agent_id);

    let matched = ctx.event_flow.iter().find(|(_, rule)| {
        source_matches(&rule.source, source_role, source_is_actor)
            && rule.matches_event_type(&event.event_type)
    });

    let Some((rule_name, rule)) = matched else {
        debug!(
            scenario_run_id = %ctx.scenario_run_id,
            source_role,
            event_type = %event.event_type,
            "no routing rule matched"
        );
        return Vec::new();
    };

    let targets = resolve_targets(&rule.target, ctx, event.source_agent_id);
    if matches!(rule.target, TargetSelector::System) {
        debug!(
            scenario_run_id = %ctx.scenario_run_id,
            rule = %rule_name,
            event_type = %event.event_type,
            "system-targeted event logged, no redelivery"
        );
    }

    let delivered_type = rule
        .transform_to
        .clone()
        .unwrap_or_else(|| event.event_type.clone());
    let priority = rule.priority.unwrap_or(0);

    targets
        .into_iter()
        .map(|target_agent_id| Delivery {
            target_agent_id,
            event_type: delivered_type.clone(),
            payload: enrich_payload(event, source_role, ctx.scenario_run_id),
            priority,
        })
        .collect()
}

/// Resolve the scenario-start rule into initial deliveries.
///
/// Finds the first rule named `scenario_initialization` or carrying the
/// `scenario_start` trigger; each resolved target receives one event of the
/// rule's declared type. System-initiated, so `other_actors` means every
/// actor. Initial events default to priority 5 so they lease ahead of
/// ordinary traffic.
pub fn scenario_start_deliveries(ctx: &ScenarioContext) -> Vec<Delivery> {
    let Some((name, rule)) = ctx
        .event_flow
        .iter()
        .find(|(name, rule)| rule.is_scenario_start(name))
    else {
        return Vec::new();
    };

    let event_type = rule
        .event_type
        .clone()
        .filter(|t| t != "any")
        .or_else(|| rule.transform_to.clone())
        .unwrap_or_else(|| "scenario_initialization".to_string());
    let priority = rule.priority.unwrap_or(5);

    let targets = match &rule.target {
        TargetSelector::OtherActors | TargetSelector::AllActors => ctx.actor_agents.clone(),
        other => {
            let mut ids = resolve_targets(other, ctx, Uuid::nil());
            ids.sort();
            ids
        }
    };

    debug!(
        scenario_run_id = %ctx.scenario_run_id,
        rule = %name,
        event_type,
        targets = targets.len(),
        "resolved scenario-start rule"
    );

    targets
        .into_iter()
        .map(|target_agent_id| Delivery {
            target_agent_id,
            event_type: event_type.clone(),
            payload: serde_json::Value::Null,
            priority,
        })
        .collect()
}

/// Check turn order and advance the pointer for actor output.
///
/// Out-of-turn emissions warn but are not suppressed; the event still
/// routes. Non-actor output never moves the turn pointer.
pub fn advance_turn_for(ctx: &mut ScenarioContext, source_agent_id: Uuid) {
    if !ctx.turn_based || !ctx.is_actor(source_agent_id) {
        return;
    }
    if let Some(expected) = ctx.current_turn {
        if expected != source_agent_id {
            warn!(
                scenario_run_id = %ctx.scenario_run_id,
                expected = %expected,
                actual = %source_agent_id,
                "agent emitted out of turn"
            );
        }
    }
    ctx.advance_turn(source_agent_id);
}

fn source_matches(selector: &SourceSelector, source_role: &str, source_is_actor: bool) -> bool {
    match selector {
        SourceSelector::Role(role) => role == source_role,
        SourceSelector::Any | SourceSelector::AnyAgent => true,
        SourceSelector::AnyActor => source_is_actor,
    }
}

fn resolve_targets(
    selector: &TargetSelector,
    ctx: &ScenarioContext,
    source_agent_id: Uuid,
) -> Vec<Uuid> {
    match selector {
        TargetSelector::AllAgents => {
            // Every mapped role, in role declaration order where possible
            let mut ids: Vec<Uuid> = ctx.role_agents.values().copied().collect();
            ids.sort();
            ids
        }
        TargetSelector::OtherActors => ctx
            .actor_agents
            .iter()
            .copied()
            .filter(|&id| id != source_agent_id)
            .collect(),
        TargetSelector::AllActors => ctx.actor_agents.clone(),
        TargetSelector::System => Vec::new(),
        TargetSelector::Role(role) => ctx.agent_for_role(role).into_iter().collect(),
    }
}

fn enrich_payload(
    event: &EmittedEvent,
    source_role: &str,
    scenario_run_id: Uuid,
) -> serde_json::Value {
    let mut payload = match &event.payload {
        serde_json::Value::Object(map) => map.clone(),
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("data".into(), other.clone());
            map
        }
    };
    payload.insert("original_event_type".into(), json!(event.event_type));
    payload.insert("source_role".into(), json!(source_role));
    payload.insert("scenario_run_id".into(), json!(scenario_run_id));
    serde_json::Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::engine::EngineType;
    use crate::domain::models::flow::FlowRule;
    use crate::domain::models::scenario::AgentInstance;
    use crate::domain::models::template::{RoleSpec, ScenarioTemplate};

    fn rule(
        source: SourceSelector,
        event_type: Option<&str>,
        target: TargetSelector,
        transform_to: Option<&str>,
    ) -> FlowRule {
        FlowRule {
            source,
            event_type: event_type.map(String::from),
            target,
            transform_to: transform_to.map(String::from),
            trigger: None,
            priority: None,
        }
    }

    struct Fixture {
        ctx: ScenarioContext,
    }

    impl Fixture {
        fn two_actors_and_narrator(turn_based: bool) -> Self {
            let mut template = ScenarioTemplate::new("router_test");
            template.config.interaction_rules.turn_based = turn_based;
            for (role, engine_type) in [
                ("primary", EngineType::Actor),
                ("secondary", EngineType::Actor),
                ("narrator", EngineType::Narrator),
            ] {
                template.agent_roles.insert(
                    role.to_string(),
                    RoleSpec {
                        template_name: format!("{role}_t"),
                        engine_type,
                        required: true,
                        config: serde_json::Value::Null,
                    },
                );
            }
            let run_id = Uuid::new_v4();
            let agents: Vec<AgentInstance> = template
                .agent_roles
                .keys()
                .map(|role| {
                    AgentInstance::new(
                        Uuid::new_v4(),
                        run_id,
                        role.clone(),
                        role.clone(),
                        serde_json::Value::Null,
                    )
                })
                .collect();
            Self {
                ctx: ScenarioContext::build(run_id, &template, &agents),
            }
        }

        fn agent(&self, role: &str) -> Uuid {
            self.ctx.agent_for_role(role).unwrap()
        }

        fn add_rule(&mut self, name: &str, rule: FlowRule) {
            self.ctx.event_flow.insert(name.to_string(), rule);
        }
    }

    fn emitted(source: Uuid, event_type: &str) -> EmittedEvent {
        EmittedEvent {
            source_agent_id: source,
            event_type: event_type.into(),
            payload: serde_json::json!({"content": "hello"}),
        }
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut fx = Fixture::two_actors_and_narrator(false);
        fx.add_rule(
            "to_secondary",
            rule(
                SourceSelector::Role("primary".into()),
                Some("actor_speech_generated"),
                TargetSelector::Role("secondary".into()),
                Some("conversation_message"),
            ),
        );
        fx.add_rule(
            "shadowed",
            rule(
                SourceSelector::Any,
                Some("actor_speech_generated"),
                TargetSelector::AllAgents,
                None,
            ),
        );

        let deliveries = route(&emitted(fx.agent("primary"), "actor_speech_generated"), &fx.ctx);
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].target_agent_id, fx.agent("secondary"));
        assert_eq!(deliveries[0].event_type, "conversation_message");
    }

    #[test]
    fn transform_to_absent_passes_type_through() {
        let mut fx = Fixture::two_actors_and_narrator(false);
        fx.add_rule(
            "passthrough",
            rule(
                SourceSelector::Any,
                None,
                TargetSelector::Role("narrator".into()),
                None,
            ),
        );
        let deliveries = route(&emitted(fx.agent("primary"), "actor_speech_generated"), &fx.ctx);
        assert_eq!(deliveries[0].event_type, "actor_speech_generated");
    }

    #[test]
    fn other_actors_excludes_source() {
        let mut fx = Fixture::two_actors_and_narrator(false);
        fx.add_rule(
            "broadcast",
            rule(
                SourceSelector::AnyActor,
                None,
                TargetSelector::OtherActors,
                None,
            ),
        );
        let source = fx.agent("primary");
        let deliveries = route(&emitted(source, "actor_speech_generated"), &fx.ctx);
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].target_agent_id, fx.agent("secondary"));
    }

    #[test]
    fn all_actors_includes_source() {
        let mut fx = Fixture::two_actors_and_narrator(false);
        fx.add_rule(
            "everyone_acts",
            rule(SourceSelector::Any, None, TargetSelector::AllActors, None),
        );
        let source = fx.agent("primary");
        let deliveries = route(&emitted(source, "actor_speech_generated"), &fx.ctx);
        let targets: Vec<Uuid> = deliveries.iter().map(|d| d.target_agent_id).collect();
        assert_eq!(targets.len(), 2);
        assert!(targets.contains(&source));
    }

    #[test]
    fn all_agents_targets_every_role() {
        let mut fx = Fixture::two_actors_and_narrator(false);
        fx.add_rule(
            "flood",
            rule(SourceSelector::Any, None, TargetSelector::AllAgents, None),
        );
        let deliveries = route(&emitted(fx.agent("primary"), "x"), &fx.ctx);
        assert_eq!(deliveries.len(), 3);
    }

    #[test]
    fn system_target_yields_no_deliveries() {
        let mut fx = Fixture::two_actors_and_narrator(false);
        fx.add_rule(
            "audit",
            rule(SourceSelector::Any, None, TargetSelector::System, None),
        );
        assert!(route(&emitted(fx.agent("primary"), "x"), &fx.ctx).is_empty());
    }

    #[test]
    fn any_actor_does_not_match_narrator() {
        let mut fx = Fixture::two_actors_and_narrator(false);
        fx.add_rule(
            "actors_only",
            rule(
                SourceSelector::AnyActor,
                None,
                TargetSelector::Role("primary".into()),
                None,
            ),
        );
        assert!(route(&emitted(fx.agent("narrator"), "x"), &fx.ctx).is_empty());
        assert_eq!(route(&emitted(fx.agent("secondary"), "x"), &fx.ctx).len(), 1);
    }

    #[test]
    fn no_match_is_a_valid_noop() {
        let mut fx = Fixture::two_actors_and_narrator(false);
        fx.add_rule(
            "specific",
            rule(
                SourceSelector::Role("primary".into()),
                Some("scene_description_generated"),
                TargetSelector::AllAgents,
                None,
            ),
        );
        assert!(route(&emitted(fx.agent("primary"), "actor_speech_generated"), &fx.ctx).is_empty());
    }

    #[test]
    fn unmapped_source_drops_event() {
        let fx = Fixture::two_actors_and_narrator(false);
        let stranger = Uuid::new_v4();
        assert!(route(&emitted(stranger, "x"), &fx.ctx).is_empty());
    }

    #[test]
    fn payload_is_enriched() {
        let mut fx = Fixture::two_actors_and_narrator(false);
        fx.add_rule(
            "to_secondary",
            rule(
                SourceSelector::Role("primary".into()),
                None,
                TargetSelector::Role("secondary".into()),
                Some("conversation_message"),
            ),
        );
        let deliveries = route(&emitted(fx.agent("primary"), "actor_speech_generated"), &fx.ctx);
        let payload = &deliveries[0].payload;
        assert_eq!(payload["content"], "hello");
        assert_eq!(payload["original_event_type"], "actor_speech_generated");
        assert_eq!(payload["source_role"], "primary");
        assert_eq!(
            payload["scenario_run_id"],
            serde_json::json!(fx.ctx.scenario_run_id)
        );
    }

    #[test]
    fn actor_output_advances_turn_round_robin() {
        let mut fx = Fixture::two_actors_and_narrator(true);
        let primary = fx.agent("primary");
        let secondary = fx.agent("secondary");
        assert_eq!(fx.ctx.current_turn, Some(primary));

        advance_turn_for(&mut fx.ctx, primary);
        assert_eq!(fx.ctx.current_turn, Some(secondary));
        advance_turn_for(&mut fx.ctx, secondary);
        assert_eq!(fx.ctx.current_turn, Some(primary));
        assert_eq!(fx.ctx.turn_history, vec![primary, secondary]);
    }

    #[test]
    fn narrator_output_leaves_turn_untouched() {
        let mut fx = Fixture::two_actors_and_narrator(true);
        let primary = fx.agent("primary");
        let narrator = fx.agent("narrator");

        advance_turn_for(&mut fx.ctx, narrator);
        assert_eq!(fx.ctx.current_turn, Some(primary));
        assert!(fx.ctx.turn_history.is_empty());
    }

    #[test]
    fn out_of_turn_emission_still_advances_from_source() {
        let mut fx = Fixture::two_actors_and_narrator(true);
        let primary = fx.agent("primary");
        let secondary = fx.agent("secondary");

        // Secondary speaks while it is primary's turn: warned, not blocked.
        advance_turn_for(&mut fx.ctx, secondary);
        assert_eq!(fx.ctx.current_turn, Some(primary));
        assert_eq!(fx.ctx.turn_history, vec![secondary]);
    }

    #[test]
    fn untimed_scenario_never_tracks_turns() {
        let mut fx = Fixture::two_actors_and_narrator(false);
        let primary = fx.agent("primary");
        advance_turn_for(&mut fx.ctx, primary);
        assert_eq!(fx.ctx.current_turn, None);
        assert!(fx.ctx.turn_history.is_empty());
    }

    #[test]
    fn scenario_start_by_trigger() {
        let mut fx = Fixture::two_actors_and_narrator(false);
        let mut kickoff = rule(
            SourceSelector::Any,
            Some("request_scene_update"),
            TargetSelector::Role("primary".into()),
            None,
        );
        kickoff.trigger = Some("scenario_start".into());
        fx.add_rule("kickoff", kickoff);

        let deliveries = scenario_start_deliveries(&fx.ctx);
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].target_agent_id, fx.agent("primary"));
        assert_eq!(deliveries[0].event_type, "request_scene_update");
        assert_eq!(deliveries[0].priority, 5);
    }

    #[test]
    fn scenario_start_by_name_to_all_agents() {
        let mut fx = Fixture::two_actors_and_narrator(false);
        fx.add_rule(
            "scenario_initialization",
            rule(SourceSelector::Any, None, TargetSelector::AllAgents, None),
        );
        let deliveries = scenario_start_deliveries(&fx.ctx);
        assert_eq!(deliveries.len(), 3);
        assert!(deliveries
            .iter()
            .all(|d| d.event_type == "scenario_initialization"));
    }

    #[test]
    fn no_scenario_start_rule_is_quiet() {
        let fx = Fixture::two_actors_and_narrator(false);
        assert!(scenario_start_deliveries(&fx.ctx).is_empty());
    }

    #[test]
    fn rule_priority_is_stamped_on_deliveries() {
        let mut fx = Fixture::two_actors_and_narrator(false);
        let mut high = rule(
            SourceSelector::Any,
            None,
            TargetSelector::Role("narrator".into()),
            None,
        );
        high.priority = Some(7);
        fx.add_rule("urgent", high);
        let deliveries = route(&emitted(fx.agent("primary"), "x"), &fx.ctx);
        assert_eq!(deliveries[0].priority, 7);
    }
}
