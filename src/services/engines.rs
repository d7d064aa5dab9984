//! Engine behaviors: actor, narrator, analyst.
//!
//! All engines share the worker loop; a behavior contributes only the
//! system-prompt composition and the output event type.

use serde_json::Value;
use uuid::Uuid;

use crate::domain::models::engine::EngineType;

/// Everything a behavior needs to know about the agent it serves.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub agent_id: Uuid,
    pub scenario_run_id: Uuid,
    pub role: String,
    pub instance_name: String,
    pub engine_type: EngineType,
    /// Personality config merged from template and runtime overrides
    pub personality: Value,
    /// LLM config (model, temperature) for this agent
    pub llm: Value,
}

impl AgentProfile {
    fn personality_str(&self, key: &str) -> Option<&str> {
        self.personality.get(key).and_then(Value::as_str)
    }

    pub fn model_override(&self) -> Option<String> {
        self.llm
            .get("model")
            .and_then(Value::as_str)
            .map(String::from)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.llm.get("temperature").and_then(Value::as_f64)
    }
}

/// The `(build_system_prompt, output_event_type)` capability set that
/// distinguishes engine types. Trait objects, not inheritance.
pub trait EngineBehavior: Send + Sync {
    fn engine_type(&self) -> EngineType;

    /// Compose the system message framing every generation for this agent.
    fn build_system_prompt(&self, profile: &AgentProfile) -> String;

    /// Event type of the output this behavior produces.
    fn output_event_type(&self) -> &'static str;

    /// Pull the generation prompt out of a delivered event payload.
    ///
    /// Falls back through the conventional payload keys; None means the
    /// event carries nothing this behavior can respond to.
    fn extract_prompt(&self, payload: &Value) -> Option<String> {
        for key in ["prompt", "content", "message", "scenario_context"] {
            if let Some(text) = payload.get(key).and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    return Some(text.to_string());
                }
            }
        }
        None
    }
}

/// Generates in-character replies from a character name and personality.
pub struct ActorBehavior;

impl EngineBehavior for ActorBehavior {
    fn engine_type(&self) -> EngineType {
        EngineType::Actor
    }

    fn build_system_prompt(&self, profile: &AgentProfile) -> String {
        let name = profile
            .personality_str("character_name")
            .unwrap_or(&profile.instance_name);
        let mut prompt = format!("You are {name}. ");
        if let Some(traits) = profile.personality_str("personality_traits") {
            prompt.push_str(&format!("Your personality is: {traits}. "));
        }
        prompt.push_str(
            "Respond in character, embodying this personality in your actions and dialogue.",
        );
        prompt
    }

    fn output_event_type(&self) -> &'static str {
        "actor_speech_generated"
    }
}

/// Generates scene and setting descriptions in a configured narrative style.
pub struct NarratorBehavior;

impl EngineBehavior for NarratorBehavior {
    fn engine_type(&self) -> EngineType {
        EngineType::Narrator
    }

    fn build_system_prompt(&self, profile: &AgentProfile) -> String {
        let style = profile
            .personality_str("narrative_style")
            .unwrap_or("a vivid, third-person narrative voice");
        format!(
            "You are the narrator of an unfolding scenario. Describe scenes, settings, \
             and transitions in {style}. Never speak for the characters."
        )
    }

    fn output_event_type(&self) -> &'static str {
        "scene_description_generated"
    }
}

/// Produces analyses of observation data with a configured focus.
pub struct AnalystBehavior;

impl EngineBehavior for AnalystBehavior {
    fn engine_type(&self) -> EngineType {
        EngineType::Analyst
    }

    fn build_system_prompt(&self, profile: &AgentProfile) -> String {
        let focus = profile
            .personality_str("analytical_focus")
            .unwrap_or("interaction dynamics and narrative coherence");
        format!(
            "You are an analyst observing a running scenario. Analyze the provided \
             observations with a focus on {focus}. Be concise and factual."
        )
    }

    fn output_event_type(&self) -> &'static str {
        "analysis_checkpoint_generated"
    }

    fn extract_prompt(&self, payload: &Value) -> Option<String> {
        // Analysts accept structured observation data, not just text.
        if let Some(observations) = payload.get("observations") {
            return serde_json::to_string_pretty(observations).ok();
        }
        for key in ["prompt", "content", "data"] {
            if let Some(text) = payload.get(key).and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    return Some(text.to_string());
                }
            }
        }
        None
    }
}

/// Behavior for an engine type.
pub fn behavior_for(engine_type: EngineType) -> Box<dyn EngineBehavior> {
    match engine_type {
        EngineType::Actor => Box::new(ActorBehavior),
        EngineType::Narrator => Box::new(NarratorBehavior),
        EngineType::Analyst => Box::new(AnalystBehavior),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile(engine_type: EngineType, personality: Value) -> AgentProfile {
        AgentProfile {
            agent_id: Uuid::new_v4(),
            scenario_run_id: Uuid::new_v4(),
            role: "primary".into(),
            instance_name: "primary_instance".into(),
            engine_type,
            personality,
            llm: json!({"model": "test-model", "temperature": 0.7}),
        }
    }

    #[test]
    fn actor_prompt_carries_name_and_traits() {
        let p = profile(
            EngineType::Actor,
            json!({"character_name": "Mara", "personality_traits": "wry and cautious"}),
        );
        let prompt = ActorBehavior.build_system_prompt(&p);
        assert!(prompt.contains("You are Mara."));
        assert!(prompt.contains("wry and cautious"));
        assert!(prompt.contains("Respond in character"));
    }

    #[test]
    fn actor_falls_back_to_instance_name() {
        let p = profile(EngineType::Actor, json!({}));
        let prompt = ActorBehavior.build_system_prompt(&p);
        assert!(prompt.contains("primary_instance"));
    }

    #[test]
    fn narrator_prompt_uses_style() {
        let p = profile(
            EngineType::Narrator,
            json!({"narrative_style": "sparse noir prose"}),
        );
        assert!(NarratorBehavior
            .build_system_prompt(&p)
            .contains("sparse noir prose"));
    }

    #[test]
    fn analyst_prompt_uses_focus() {
        let p = profile(
            EngineType::Analyst,
            json!({"analytical_focus": "power dynamics"}),
        );
        assert!(AnalystBehavior
            .build_system_prompt(&p)
            .contains("power dynamics"));
    }

    #[test]
    fn prompt_extraction_key_fallback() {
        let b = ActorBehavior;
        assert_eq!(
            b.extract_prompt(&json!({"prompt": "speak"})),
            Some("speak".into())
        );
        assert_eq!(
            b.extract_prompt(&json!({"content": "hello there"})),
            Some("hello there".into())
        );
        assert_eq!(b.extract_prompt(&json!({"content": "   "})), None);
        assert_eq!(b.extract_prompt(&json!({})), None);
    }

    #[test]
    fn analyst_accepts_structured_observations() {
        let extracted = AnalystBehavior
            .extract_prompt(&json!({"observations": {"turns": 4, "speaker": "Mara"}}))
            .unwrap();
        assert!(extracted.contains("turns"));
    }

    #[test]
    fn output_event_types_match_engine_types() {
        for engine_type in [EngineType::Actor, EngineType::Narrator, EngineType::Analyst] {
            let behavior = behavior_for(engine_type);
            assert_eq!(behavior.engine_type(), engine_type);
            assert_eq!(
                behavior.output_event_type(),
                engine_type.output_event_type()
            );
        }
    }

    #[test]
    fn profile_llm_accessors() {
        let p = profile(EngineType::Actor, json!({}));
        assert_eq!(p.model_override(), Some("test-model".into()));
        assert_eq!(p.temperature(), Some(0.7));
    }
}
