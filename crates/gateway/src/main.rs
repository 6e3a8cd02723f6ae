use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use am_gateway::bootstrap;
use am_gateway::cli::{self, Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let config_path = args.config.as_deref();

    match args.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _path) = cli::load_config(config_path)?;
            bootstrap::run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, path) = cli::load_config(config_path)?;
            if !cli::validate(&config, path.as_deref()) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _path) = cli::load_config(config_path)?;
            cli::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("agentmesh {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,am_gateway=debug")),
        )
        .json()
        .init();
}
