//! Engine registry commands against a running coordinator.

use serde_json::Value;

use crate::cli::client::{ApiClient, CliError};
use crate::cli::output;
use crate::cli::EngineCommands;
use crate::domain::models::config::Config;

pub async fn run(config: Config, command: EngineCommands, json_output: bool) -> Result<(), CliError> {
    let client = ApiClient::new(&config.server);
    match command {
        EngineCommands::List {
            engine_type,
            status,
        } => {
            let mut path = String::from("/engines");
            let mut params = Vec::new();
            if let Some(engine_type) = engine_type {
                params.push(format!("engine_type={engine_type}"));
            }
            if let Some(status) = status {
                params.push(format!("status={status}"));
            }
            if !params.is_empty() {
                path.push('?');
                path.push_str(&params.join("&"));
            }
            let response = client.get(&path).await?;
            if json_output {
                output::print_json(&response);
            } else if let Value::Array(rows) = &response {
                println!(
                    "{}",
                    output::table(
                        &[
                            "id",
                            "engine_type",
                            "status",
                            "current_workload",
                            "processed_events_count",
                            "error_count",
                            "last_heartbeat"
                        ],
                        rows
                    )
                );
            }
            Ok(())
        }
        EngineCommands::Health => {
            let response = client.get("/engines/health/system").await?;
            output::print_json(&response);
            Ok(())
        }
    }
}
