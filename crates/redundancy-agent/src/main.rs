//! Redundancy agent binary

use anyhow::Context;
use clap::Parser;
use redundancy::SystemHost;
use redundancy_agent::{Agent, Cli, Config, Outcome};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Settings first: they carry the log level
    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::load().context("Failed to load agent settings")?,
    };

    if config.logging.is_json() {
        common::logging::init_json(config.logging.level());
    } else {
        common::logging::init(config.logging.level());
    }

    let agent = Agent::new(&config, cli.state, cli.inventory);
    match agent.run(SystemHost::new(), cli.command).await? {
        Outcome::Status(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        outcome => {
            tracing::info!(command = %cli.command, ?outcome, "Done");
        }
    }

    Ok(())
}
