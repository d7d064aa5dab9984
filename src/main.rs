//! Dramatis CLI entry point.

use clap::Parser;
use dramatis::cli::commands::{engine, init, scenario, serve};
use dramatis::cli::{Cli, Commands};
use dramatis::infrastructure::config::ConfigLoader;
use dramatis::infrastructure::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    };

    // Table-producing commands keep stdout clean; the server logs fully.
    let _logging = if matches!(cli.command, Commands::Serve { .. }) {
        match logging::init(&config.logging) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("error: failed to initialize logging: {e:#}");
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let result: Result<(), i32> = match cli.command {
        Commands::Serve { port } => serve::run(config, port).await.map_err(|e| {
            eprintln!("error: {e:#}");
            1
        }),
        Commands::Init { force } => init::run(config, force).await.map_err(|e| {
            eprintln!("error: {e:#}");
            1
        }),
        Commands::Scenario(command) => scenario::run(config, command, cli.json)
            .await
            .map_err(|e| {
                eprintln!("error: {e}");
                e.exit_code()
            }),
        Commands::Engine(command) => engine::run(config, command, cli.json).await.map_err(|e| {
            eprintln!("error: {e}");
            e.exit_code()
        }),
    };

    if let Err(code) = result {
        std::process::exit(code);
    }
}
