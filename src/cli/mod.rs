//! Command-line interface.
//!
//! `serve` and `init` run in-process; scenario and engine commands talk to
//! a running coordinator through the control-plane API.

pub mod client;
pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "dramatis",
    about = "Agent-scenario orchestration runtime",
    version
)]
pub struct Cli {
    /// Emit machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the coordinator: database, engine manager, and control-plane API
    Serve {
        /// Override the configured API port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Initialize the database and seed demo templates
    Init {
        /// Re-seed even if templates already exist
        #[arg(long)]
        force: bool,
    },

    /// Scenario lifecycle commands
    #[command(subcommand)]
    Scenario(ScenarioCommands),

    /// Engine registry commands
    #[command(subcommand)]
    Engine(EngineCommands),
}

#[derive(Subcommand)]
pub enum ScenarioCommands {
    /// Start a scenario from a template
    Start {
        /// Scenario template name
        template: String,
        /// Runtime scenario config as inline JSON
        #[arg(long)]
        config: Option<String>,
        /// Per-role agent config overrides as inline JSON
        #[arg(long)]
        agent_configs: Option<String>,
    },
    /// List scenario runs
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show status, state, and queue counts for a run
    Status { id: uuid::Uuid },
    /// Send an event into a running scenario
    Send {
        id: uuid::Uuid,
        /// Event type name
        #[arg(long)]
        event_type: String,
        /// Event payload as inline JSON
        #[arg(long)]
        data: Option<String>,
        /// Target a specific agent instance
        #[arg(long)]
        target: Option<uuid::Uuid>,
        /// Path to a JSON file holding an event sequence
        #[arg(long, conflicts_with_all = ["data", "target"])]
        sequence: Option<std::path::PathBuf>,
    },
    /// Stop a running scenario
    Stop {
        id: uuid::Uuid,
        #[arg(long, default_value = "user_terminated")]
        reason: String,
    },
    /// Resume a paused or interrupted scenario
    Resume { id: uuid::Uuid },
}

#[derive(Subcommand)]
pub enum EngineCommands {
    /// List registered engines
    List {
        #[arg(long)]
        engine_type: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Show aggregate system health
    Health,
}
