//! Scenario commands against a running coordinator.

use serde_json::{json, Value};

use crate::cli::client::{ApiClient, CliError};
use crate::cli::output;
use crate::cli::ScenarioCommands;
use crate::domain::models::config::Config;

pub async fn run(config: Config, command: ScenarioCommands, json_output: bool) -> Result<(), CliError> {
    let client = ApiClient::new(&config.server);
    match command {
        ScenarioCommands::Start {
            template,
            config: scenario_config,
            agent_configs,
        } => {
            let mut body = json!({ "template_name": template });
            if let Some(raw) = scenario_config {
                body["scenario_config"] = parse_inline_json(&raw)?;
            }
            if let Some(raw) = agent_configs {
                body["agent_configs"] = parse_inline_json(&raw)?;
            }
            let response = client.post("/scenarios/execute-from-template", &body).await?;
            if json_output {
                output::print_json(&response);
            } else {
                let id = response
                    .get("scenario_run_id")
                    .and_then(Value::as_str)
                    .unwrap_or("?");
                output::success(&format!("scenario started: {id}"));
            }
            Ok(())
        }
        ScenarioCommands::List { status, limit } => {
            let mut path = format!("/scenarios?limit={limit}");
            if let Some(status) = status {
                path.push_str(&format!("&status={status}"));
            }
            let response = client.get(&path).await?;
            if json_output {
                output::print_json(&response);
            } else if let Value::Array(rows) = &response {
                println!(
                    "{}",
                    output::table(
                        &["id", "name", "status", "current_turn_number", "started_at"],
                        rows
                    )
                );
            }
            Ok(())
        }
        ScenarioCommands::Status { id } => {
            let response = client.get(&format!("/scenarios/{id}/status")).await?;
            output::print_json(&response);
            Ok(())
        }
        ScenarioCommands::Send {
            id,
            event_type,
            data,
            target,
            sequence,
        } => {
            if let Some(path) = sequence {
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    CliError::Generic(format!("failed to read {}: {e}", path.display()))
                })?;
                let steps: Value = serde_json::from_str(&raw)
                    .map_err(|e| CliError::TemplateOrValidation(format!("bad sequence file: {e}")))?;
                let Value::Array(steps) = steps else {
                    return Err(CliError::TemplateOrValidation(
                        "sequence file must hold a JSON array".into(),
                    ));
                };
                for step in steps {
                    // Sequence files use the runner's step shape; the
                    // dispatch endpoint takes `event_data`.
                    let mut body = json!({
                        "event_type": step.get("event_type").cloned().unwrap_or_default(),
                        "event_data": step.get("data").cloned().unwrap_or(Value::Null),
                    });
                    if let Some(target) = step.get("target_agent_id") {
                        body["target_agent_id"] = target.clone();
                    }
                    let response = client
                        .post(&format!("/scenarios/{id}/dispatch-event"), &body)
                        .await?;
                    if json_output {
                        output::print_json(&response);
                    }
                    let delay = step
                        .get("delay_seconds")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    if delay > 0 {
                        tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                    }
                }
                if !json_output {
                    output::success("sequence dispatched");
                }
                return Ok(());
            }

            let mut body = json!({ "event_type": event_type });
            if let Some(raw) = data {
                body["event_data"] = parse_inline_json(&raw)?;
            }
            if let Some(target) = target {
                body["target_agent_id"] = json!(target);
            }
            let response = client
                .post(&format!("/scenarios/{id}/dispatch-event"), &body)
                .await?;
            if json_output {
                output::print_json(&response);
            } else {
                output::success("event dispatched");
            }
            Ok(())
        }
        ScenarioCommands::Stop { id, reason } => {
            let response = client
                .post(&format!("/scenarios/{id}/stop"), &json!({ "reason": reason }))
                .await?;
            if json_output {
                output::print_json(&response);
            } else {
                output::success(&format!("scenario {id} terminated ({reason})"));
            }
            Ok(())
        }
        ScenarioCommands::Resume { id } => {
            let response = client
                .post(&format!("/scenarios/{id}/resume"), &json!({}))
                .await?;
            if json_output {
                output::print_json(&response);
            } else {
                output::success(&format!("scenario {id} resumed"));
            }
            Ok(())
        }
    }
}

fn parse_inline_json(raw: &str) -> Result<Value, CliError> {
    serde_json::from_str(raw)
        .map_err(|e| CliError::TemplateOrValidation(format!("invalid inline JSON: {e}")))
}
