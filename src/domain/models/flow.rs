//! Event-flow graph model.
//!
//! A scenario template declares an ordered set of flow rules mapping an
//! emitted event `(source role, event type)` to a target selector and an
//! optionally transformed delivered event type. Role aliases such as
//! `any_actor` and `other_actors` are resolved at routing time against the
//! live actor set, which keeps the graph itself static and acyclic.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Matches the role that emitted an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelector {
    /// A specific role name
    Role(String),
    /// Any source
    Any,
    /// Any role served by an actor engine
    AnyActor,
    /// Any mapped agent (alias kept for template compatibility)
    AnyAgent,
}

impl SourceSelector {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Role(name) => name,
            Self::Any => "any",
            Self::AnyActor => "any_actor",
            Self::AnyAgent => "any_agent",
        }
    }

    fn from_string(s: String) -> Self {
        match s.as_str() {
            "any" => Self::Any,
            "any_actor" => Self::AnyActor,
            "any_agent" => Self::AnyAgent,
            _ => Self::Role(s),
        }
    }
}

impl Serialize for SourceSelector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SourceSelector {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_string(String::deserialize(deserializer)?))
    }
}

/// Resolves to the set of agents a delivered event targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    /// Every mapped role
    AllAgents,
    /// Every actor agent except the source
    OtherActors,
    /// Every actor agent including the source
    AllActors,
    /// No redelivery; the event is logged only
    System,
    /// The single agent mapped to a role
    Role(String),
}

impl TargetSelector {
    pub fn as_str(&self) -> &str {
        match self {
            Self::AllAgents => "all_agents",
            Self::OtherActors => "other_actors",
            Self::AllActors => "all_actors",
            Self::System => "system",
            Self::Role(name) => name,
        }
    }

    fn from_string(s: String) -> Self {
        match s.as_str() {
            "all_agents" => Self::AllAgents,
            "other_actors" => Self::OtherActors,
            "all_actors" => Self::AllActors,
            "system" => Self::System,
            _ => Self::Role(s),
        }
    }
}

impl Serialize for TargetSelector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TargetSelector {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_string(String::deserialize(deserializer)?))
    }
}

/// One entry of the event-flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRule {
    pub source: SourceSelector,
    /// Event type this rule matches; absent or "any" matches everything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub target: TargetSelector,
    /// Rewrites the delivered event type; absent means pass-through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_to: Option<String>,
    /// Lifecycle trigger (e.g. "scenario_start") for system-initiated rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Priority stamped onto delivered events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

impl FlowRule {
    /// Whether this rule's event-type filter accepts the given type.
    pub fn matches_event_type(&self, event_type: &str) -> bool {
        match self.event_type.as_deref() {
            None | Some("any") => true,
            Some(t) => t == event_type,
        }
    }

    /// Whether this rule fires on scenario start.
    pub fn is_scenario_start(&self, name: &str) -> bool {
        name == "scenario_initialization" || self.trigger.as_deref() == Some("scenario_start")
    }
}

/// The full flow graph, in declaration order. First match wins.
pub type EventFlow = IndexMap<String, FlowRule>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_serde_round_trip() {
        let json = r#""any_actor""#;
        let sel: SourceSelector = serde_json::from_str(json).unwrap();
        assert_eq!(sel, SourceSelector::AnyActor);
        assert_eq!(serde_json::to_string(&sel).unwrap(), json);

        let sel: SourceSelector = serde_json::from_str(r#""primary""#).unwrap();
        assert_eq!(sel, SourceSelector::Role("primary".into()));

        let tgt: TargetSelector = serde_json::from_str(r#""other_actors""#).unwrap();
        assert_eq!(tgt, TargetSelector::OtherActors);
        let tgt: TargetSelector = serde_json::from_str(r#""narrator""#).unwrap();
        assert_eq!(tgt, TargetSelector::Role("narrator".into()));
    }

    #[test]
    fn flow_preserves_declaration_order() {
        let json = r#"{
            "third": {"source": "c", "target": "system"},
            "first": {"source": "a", "target": "system"},
            "second": {"source": "b", "target": "system"}
        }"#;
        let flow: EventFlow = serde_json::from_str(json).unwrap();
        let names: Vec<&String> = flow.keys().collect();
        assert_eq!(names, ["third", "first", "second"]);
    }

    #[test]
    fn event_type_matching() {
        let rule = FlowRule {
            source: SourceSelector::Any,
            event_type: None,
            target: TargetSelector::System,
            transform_to: None,
            trigger: None,
            priority: None,
        };
        assert!(rule.matches_event_type("anything"));

        let rule = FlowRule {
            event_type: Some("any".into()),
            ..rule
        };
        assert!(rule.matches_event_type("anything"));

        let rule = FlowRule {
            event_type: Some("actor_speech_generated".into()),
            ..rule
        };
        assert!(rule.matches_event_type("actor_speech_generated"));
        assert!(!rule.matches_event_type("scene_description_generated"));
    }

    #[test]
    fn scenario_start_detection() {
        let by_trigger = FlowRule {
            source: SourceSelector::Any,
            event_type: Some("request_scene_update".into()),
            target: TargetSelector::Role("primary".into()),
            transform_to: None,
            trigger: Some("scenario_start".into()),
            priority: None,
        };
        assert!(by_trigger.is_scenario_start("kickoff"));

        let by_name = FlowRule {
            trigger: None,
            ..by_trigger.clone()
        };
        assert!(by_name.is_scenario_start("scenario_initialization"));
        assert!(!by_name.is_scenario_start("kickoff"));
    }
}
