//! The `init` command: create the database and seed demo templates.

use anyhow::{Context, Result};
use serde_json::json;

use crate::cli::output;
use crate::domain::models::config::Config;
use crate::domain::models::engine::EngineType;
use crate::domain::models::flow::{FlowRule, SourceSelector, TargetSelector};
use crate::domain::models::template::{
    AgentTemplate, RoleSpec, ScenarioTemplate,
};
use crate::domain::ports::errors::StoreError;
use crate::domain::ports::template_store::TemplateStore;
use crate::infrastructure::database::{DatabaseConnection, TemplateRepository};

pub async fn run(config: Config, force: bool) -> Result<()> {
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("failed to create database directory")?;
        }
    }

    let database_url = format!("sqlite:{}", config.database.path);
    let db = DatabaseConnection::new(&database_url)
        .await
        .context("failed to connect to database")?;
    db.migrate().await.context("failed to run migrations")?;
    output::success(&format!("database ready at {}", config.database.path));

    let templates = TemplateRepository::new(db.pool().clone());

    match templates
        .scenario_template_by_name("two_actor_conversation")
        .await
    {
        Ok(_) if !force => {
            output::success("demo templates already seeded (use --force to re-seed)");
            db.close().await;
            return Ok(());
        }
        Ok(_) => {
            sqlx::query("DELETE FROM scenario_templates")
                .execute(db.pool())
                .await?;
            sqlx::query("DELETE FROM agent_templates")
                .execute(db.pool())
                .await?;
        }
        Err(StoreError::NotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    seed_demo_templates(&templates).await?;
    output::success("seeded demo templates: two_actor_conversation, observed_conversation");
    db.close().await;
    Ok(())
}

async fn seed_demo_templates(templates: &TemplateRepository) -> Result<()> {
    let improv_actor = AgentTemplate::new("improv_actor", EngineType::Actor)
        .with_personality(json!({
            "character_name": "Improviser",
            "personality_traits": "quick-witted, collaborative, keeps scenes moving",
        }))
        .with_llm_config(json!({ "temperature": 0.9 }));
    let scene_narrator = AgentTemplate::new("scene_narrator", EngineType::Narrator)
        .with_personality(json!({
            "narrative_style": "economical third-person prose with strong sensory detail",
        }));
    let dialogue_analyst = AgentTemplate::new("dialogue_analyst", EngineType::Analyst)
        .with_personality(json!({
            "analytical_focus": "conversational balance and emerging conflict",
        }));

    templates.insert_agent_template(&improv_actor).await?;
    templates.insert_agent_template(&scene_narrator).await?;
    templates.insert_agent_template(&dialogue_analyst).await?;

    // Two actors passing conversation messages back and forth, turn-based.
    let mut duo = ScenarioTemplate::new("two_actor_conversation");
    duo.description = Some("Two actors improvising a turn-based conversation".into());
    duo.config.max_turns = Some(12);
    duo.config.timeout_seconds = Some(600);
    duo.config.interaction_rules.turn_based = true;
    for role in ["primary", "secondary"] {
        duo.agent_roles.insert(
            role.to_string(),
            RoleSpec {
                template_name: "improv_actor".into(),
                engine_type: EngineType::Actor,
                required: true,
                config: serde_json::Value::Null,
            },
        );
    }
    duo.event_flow.insert(
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
    duo.event_flow.insert(
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
    duo.event_flow.insert(
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
    templates.insert_scenario_template(&duo).await?;

    // The same conversation with a narrator setting scenes and an analyst
    // observing every actor line.
    let mut observed = ScenarioTemplate::new("observed_conversation");
    observed.description =
        Some("Two actors with a narrator and an analyst observing".into());
    observed.config.max_turns = Some(20);
    observed.config.timeout_seconds = Some(900);
    observed.config.interaction_rules.turn_based = true;
    for (role, template_name, engine_type, required) in [
        ("primary", "improv_actor", EngineType::Actor, true),
        ("secondary", "improv_actor", EngineType::Actor, true),
        ("narrator", "scene_narrator", EngineType::Narrator, true),
        ("observer", "dialogue_analyst", EngineType::Analyst, false),
    ] {
        observed.agent_roles.insert(
            role.to_string(),
            RoleSpec {
                template_name: template_name.into(),
                engine_type,
                required,
                config: serde_json::Value::Null,
            },
        );
    }
    observed.event_flow.insert(
        "scenario_initialization".into(),
        FlowRule {
            source: SourceSelector::Any,
            event_type: Some("request_scene_update".into()),
            target: TargetSelector::Role("narrator".into()),
            transform_to: None,
            trigger: Some("scenario_start".into()),
            priority: Some(5),
        },
    );
    observed.event_flow.insert(
        "scene_set".into(),
        FlowRule {
            source: SourceSelector::Role("narrator".into()),
            event_type: Some("scene_description_generated".into()),
            target: TargetSelector::AllActors,
            transform_to: Some("conversation_message".into()),
            trigger: None,
            priority: None,
        },
    );
    observed.event_flow.insert(
        "actor_lines".into(),
        FlowRule {
            source: SourceSelector::AnyActor,
            event_type: Some("actor_speech_generated".into()),
            target: TargetSelector::OtherActors,
            transform_to: Some("conversation_message".into()),
            trigger: None,
            priority: None,
        },
    );
    observed.event_flow.insert(
        "analysis_log".into(),
        FlowRule {
            source: SourceSelector::Role("observer".into()),
            event_type: Some("analysis_checkpoint_generated".into()),
            target: TargetSelector::System,
            transform_to: None,
            trigger: None,
            priority: None,
        },
    );
    templates.insert_scenario_template(&observed).await?;

    Ok(())
}
