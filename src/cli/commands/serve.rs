//! The `serve` command: run the coordinator.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::domain::models::config::Config;
use crate::infrastructure::api::{self, AppState};
use crate::infrastructure::database::{
    DatabaseConnection, EngineRepository, EventRepository, ScenarioRepository,
    TemplateRepository,
};
use crate::infrastructure::llm::HttpLlmClient;
use crate::services::{EngineManager, EventBus, ScenarioRunner};

pub async fn run(config: Config, port_override: Option<u16>) -> Result<()> {
    let database_url = format!("sqlite:{}", config.database.path);
    let db = DatabaseConnection::new(&database_url)
        .await
        .context("failed to connect to database")?;
    db.migrate().await.context("failed to run migrations")?;

    let event_store = Arc::new(EventRepository::new(db.pool().clone()));
    let registry = Arc::new(EngineRepository::new(db.pool().clone()));
    let scenario_store = Arc::new(ScenarioRepository::new(db.pool().clone()));
    let template_store = Arc::new(TemplateRepository::new(db.pool().clone()));

    let llm = Arc::new(
        HttpLlmClient::new(&config.llm)
            .map_err(|e| anyhow::anyhow!("failed to build LLM client: {e}"))?,
    );
    let bus = Arc::new(EventBus::default());

    let manager = EngineManager::new(
        event_store.clone(),
        registry.clone(),
        scenario_store.clone(),
        llm,
        bus,
        config.worker.clone(),
    );
    let routing = manager.start_routing();

    let runner = ScenarioRunner::new(
        scenario_store.clone(),
        template_store,
        event_store.clone(),
        manager.clone(),
        config.queue.clone(),
    );

    let state = AppState {
        event_store,
        registry,
        scenario_store,
        runner: runner.clone(),
    };

    let host = config.server.host.clone();
    let port = port_override.unwrap_or(config.server.port);

    tokio::select! {
        result = api::serve(state, &host, port) => {
            result.context("API server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    runner.shutdown().await;
    routing.abort();
    db.close().await;
    info!("coordinator stopped");
    Ok(())
}
