//! Shared harness for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use dramatis::domain::models::config::{QueueConfig, WorkerConfig};
use dramatis::domain::models::engine::{
    EngineCapabilities, EngineInstance, EngineType, ResourceLimits,
};
use dramatis::domain::models::flow::{FlowRule, SourceSelector, TargetSelector};
use dramatis::domain::models::template::{AgentTemplate, RoleSpec, ScenarioTemplate};
use dramatis::domain::ports::engine_registry::EngineRegistry;
use dramatis::domain::ports::llm_client::LlmClient;
use dramatis::domain::ports::template_store::TemplateStore;
use dramatis::infrastructure::database::{
    DatabaseConnection, EngineRepository, EventRepository, ScenarioRepository,
    TemplateRepository,
};
use dramatis::services::{EngineManager, EventBus, ScenarioRunner};

pub struct Harness {
    // Held for the lifetime of the test so the database file survives.
    pub _dir: TempDir,
    pub db: DatabaseConnection,
    pub event_store: Arc<EventRepository>,
    pub registry: Arc<EngineRepository>,
    pub scenario_store: Arc<ScenarioRepository>,
    pub template_store: Arc<TemplateRepository>,
    pub bus: Arc<EventBus>,
    pub manager: Arc<EngineManager>,
    pub runner: Arc<ScenarioRunner>,
}

/// Fast worker cadence so integration tests finish quickly.
pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval_secs: 1,
        shutdown_grace_secs: 5,
        degrade_error_threshold: 5,
    }
}

pub fn fast_queue_config() -> QueueConfig {
    QueueConfig {
        max_retries: 3,
        monitor_interval_secs: 1,
    }
}

pub async fn harness(llm: Arc<dyn LlmClient>) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dramatis.db");
    let db = DatabaseConnection::new(&format!("sqlite:{}", path.display()))
        .await
        .expect("failed to open database");
    db.migrate().await.expect("failed to migrate");

    let event_store = Arc::new(EventRepository::new(db.pool().clone()));
    let registry = Arc::new(EngineRepository::new(db.pool().clone()));
    let scenario_store = Arc::new(ScenarioRepository::new(db.pool().clone()));
    let template_store = Arc::new(TemplateRepository::new(db.pool().clone()));
    let bus = Arc::new(EventBus::default());

    let manager = EngineManager::new(
        event_store.clone(),
        registry.clone(),
        scenario_store.clone(),
        llm,
        bus.clone(),
        fast_worker_config(),
    );
    manager.start_routing();

    let runner = ScenarioRunner::new(
        scenario_store.clone(),
        template_store.clone(),
        event_store.clone(),
        manager.clone(),
        fast_queue_config(),
    );

    Harness {
        _dir: dir,
        db,
        event_store,
        registry,
        scenario_store,
        template_store,
        bus,
        manager,
        runner,
    }
}

/// Register a bare engine row directly, for queue-level tests.
pub async fn register_engine(registry: &EngineRepository, engine_type: EngineType) -> String {
    let engine = EngineInstance::register(
        engine_type,
        "test",
        EngineCapabilities {
            supported_event_types: vec![
                "scenario_initialization".into(),
                "conversation_message".into(),
                "analyze_checkpoint".into(),
            ],
            ..Default::default()
        },
        ResourceLimits::default(),
        None,
    );
    registry.insert(&engine).await.expect("register engine");
    engine.id
}

/// Seed the two-actor turn-based template plus its agent template.
/// Flow: scenario_start -> conversation_message to primary;
/// primary speech -> secondary; secondary speech -> primary.
pub async fn seed_two_actor_template(templates: &TemplateRepository) -> ScenarioTemplate {
    let actor = AgentTemplate::new("improv_actor", EngineType::Actor).with_personality(json!({
        "character_name": "Improviser",
        "personality_traits": "terse and cooperative",
    }));
    templates
        .insert_agent_template(&actor)
        .await
        .expect("seed agent template");

    let mut template = ScenarioTemplate::new("two_actor_conversation");
    template.config.interaction_rules.turn_based = true;
    template.config.max_turns = Some(50);
    for role in ["primary", "secondary"] {
        template.agent_roles.insert(
            role.to_string(),
            RoleSpec {
                template_name: "improv_actor".into(),
                engine_type: EngineType::Actor,
                required: true,
                config: serde_json::Value::Null,
            },
        );
    }
    template.event_flow.insert(
        "scenario_initialization".into(),
        FlowRule {
            source: SourceSelector::Any,
            event_type: Some("conversation_message".into()),
            target: TargetSelector::Role("primary".into()),
            transform_to: None,
            trigger: Some("scenario_start".into()),
            priority: Some(5),
        },
    );
    template.event_flow.insert(
        "primary_speech".into(),
        FlowRule {
            source: SourceSelector::Role("primary".into()),
            event_type: Some("actor_speech_generated".into()),
            target: TargetSelector::Role("secondary".into()),
            transform_to: Some("conversation_message".into()),
            trigger: None,
            priority: None,
        },
    );
    template.event_flow.insert(
        "secondary_speech".into(),
        FlowRule {
            source: SourceSelector::Role("secondary".into()),
            event_type: Some("actor_speech_generated".into()),
            target: TargetSelector::Role("primary".into()),
            transform_to: Some("conversation_message".into()),
            trigger: None,
            priority: None,
        },
    );
    templates
        .insert_scenario_template(&template)
        .await
        .expect("seed scenario template");
    template
}

/// Insert a scenario-run row directly, for queue tests that need a valid
/// foreign key without the full runner.
pub async fn seed_bare_run(harness: &Harness) -> Uuid {
    use dramatis::domain::models::scenario::ScenarioRun;
    use dramatis::domain::models::template::ScenarioConfig;
    use dramatis::domain::ports::scenario_store::ScenarioStore;

    let template = ScenarioTemplate::new(format!("bare_{}", Uuid::new_v4().simple()));
    harness
        .template_store
        .insert_scenario_template(&template)
        .await
        .expect("seed template");
    let run = ScenarioRun::new(template.id, "bare_run", ScenarioConfig::default());
    harness
        .scenario_store
        .insert_run(&run)
        .await
        .expect("seed run");
    run.id
}

/// Poll `predicate` every 50 ms until it returns Some or the timeout hits.
pub async fn wait_for<T, F, Fut>(timeout_secs: u64, mut predicate: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(timeout_secs);
    loop {
        if let Some(value) = predicate().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}
